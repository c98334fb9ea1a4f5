//! HTTP client action configuration: retries, cache, auth, TLS, redirects.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::decode;

/// Retry policy for the HTTP action: exponential backoff capped by
/// `maxBackoff`, retrying only the listed statuses (any 5xx when unset).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    #[serde(deserialize_with = "decode::flex_u32", skip_serializing_if = "is_zero_u32")]
    pub max_attempts: u32,
    #[serde(
        deserialize_with = "decode::flex_duration_opt",
        serialize_with = "decode::duration_opt_to_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub backoff: Option<Duration>,
    #[serde(
        deserialize_with = "decode::flex_duration_opt",
        serialize_with = "decode::duration_opt_to_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_backoff: Option<Duration>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retry_on: Vec<u16>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

impl RetryConfig {
    /// Total attempts, at least one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether `status` should be retried: member of `retryOn`, or any 5xx
    /// when `retryOn` is unset.
    pub fn should_retry_status(&self, status: u16) -> bool {
        if self.retry_on.is_empty() {
            (500..600).contains(&status)
        } else {
            self.retry_on.contains(&status)
        }
    }

    /// Backoff before retry number `attempt` (0-based): exponential doubling
    /// from `backoff`, capped by `maxBackoff`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.unwrap_or(Duration::from_millis(500));
        let exp = base.saturating_mul(2u32.saturating_pow(attempt));
        match self.max_backoff {
            Some(cap) => exp.min(cap),
            None => exp,
        }
    }
}

/// Response cache: TTL-bounded, keyed explicitly or by `(method, url, body digest)`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpCacheConfig {
    #[serde(deserialize_with = "decode::flex_bool", skip_serializing_if = "std::ops::Not::not")]
    pub enabled: bool,
    #[serde(
        deserialize_with = "decode::flex_duration_opt",
        serialize_with = "decode::duration_opt_to_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub ttl: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Supported auth schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpAuthKind {
    Basic,
    Bearer,
    Oauth2,
    ApiKey,
}

/// Request authentication. Which fields apply depends on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpAuthConfig {
    #[serde(rename = "type")]
    pub kind: HttpAuthKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Bearer/OAuth2 token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Header carrying the API key (default `X-Api-Key`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// TLS knobs for the HTTP action.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpTlsConfig {
    #[serde(deserialize_with = "decode::flex_bool", skip_serializing_if = "std::ops::Not::not")]
    pub insecure_skip_verify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_cert_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key_path: Option<String>,
}

/// HTTP client action.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpClientConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(
        alias = "timeout",
        deserialize_with = "decode::flex_duration_opt",
        serialize_with = "decode::duration_opt_to_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<HttpCacheConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<HttpAuthConfig>,
    /// `None` follows redirects (the default); `Some(false)` returns the first
    /// response verbatim.
    #[serde(deserialize_with = "decode::flex_bool_opt", skip_serializing_if = "Option::is_none")]
    pub follow_redirects: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<HttpTlsConfig>,
}

impl HttpClientConfig {
    /// Uppercased method, defaulting to GET.
    pub fn get_method(&self) -> String {
        if self.method.is_empty() {
            "GET".to_string()
        } else {
            self.method.to_ascii_uppercase()
        }
    }

    /// Whether redirects should be followed.
    pub fn follows_redirects(&self) -> bool {
        self.follow_redirects.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_status_selection() {
        let r = RetryConfig::default();
        assert!(r.should_retry_status(500));
        assert!(r.should_retry_status(503));
        assert!(!r.should_retry_status(404));

        let r: RetryConfig = serde_yaml::from_str("retryOn: [429, 503]").unwrap();
        assert!(r.should_retry_status(429));
        assert!(!r.should_retry_status(500));
    }

    /// **Scenario**: backoff doubles per attempt and is capped by `maxBackoff`.
    #[test]
    fn retry_backoff_growth_and_cap() {
        let r: RetryConfig =
            serde_yaml::from_str("backoff: 100ms\nmaxBackoff: 300ms").unwrap();
        assert_eq!(r.delay(0), Duration::from_millis(100));
        assert_eq!(r.delay(1), Duration::from_millis(200));
        assert_eq!(r.delay(2), Duration::from_millis(300));
        assert_eq!(r.delay(5), Duration::from_millis(300));
    }

    #[test]
    fn follow_redirects_tristate() {
        let c: HttpClientConfig = serde_yaml::from_str("url: http://x").unwrap();
        assert!(c.follows_redirects());
        let c: HttpClientConfig =
            serde_yaml::from_str("url: http://x\nfollowRedirects: \"no\"").unwrap();
        assert_eq!(c.follow_redirects, Some(false));
        assert!(!c.follows_redirects());
    }

    #[test]
    fn auth_kinds() {
        let a: HttpAuthConfig =
            serde_yaml::from_str("type: bearer\ntoken: t0ken").unwrap();
        assert_eq!(a.kind, HttpAuthKind::Bearer);
        let a: HttpAuthConfig =
            serde_yaml::from_str("type: api_key\napiKey: k\nheader: X-Key").unwrap();
        assert_eq!(a.kind, HttpAuthKind::ApiKey);
    }

    #[test]
    fn timeout_alias_and_roundtrip() {
        let c: HttpClientConfig = serde_yaml::from_str(
            "method: post\nurl: http://svc/api\ntimeout: 250ms\nretry:\n  maxAttempts: \"3\"\n  backoff: 100ms",
        )
        .unwrap();
        assert_eq!(c.get_method(), "POST");
        assert_eq!(c.timeout_duration, Some(Duration::from_millis(250)));
        assert_eq!(c.retry.as_ref().unwrap().attempts(), 3);
        let y = serde_yaml::to_string(&c).unwrap();
        assert!(y.contains("timeoutDuration"));
        let back: HttpClientConfig = serde_yaml::from_str(&y).unwrap();
        assert_eq!(back, c);
    }
}
