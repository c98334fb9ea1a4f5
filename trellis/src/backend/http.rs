//! HTTP client action backend: merged timeout/TLS/proxy, status- and
//! network-level retries with exponential backoff, TTL response cache.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::app_error::{AppCode, AppError};
use crate::backend::http_cache::HttpCache;
use crate::backend::{classify_reqwest, with_timeout};
use crate::config::{HttpAuthKind, HttpClientConfig};

/// Executes `httpClient` actions against a shared response cache.
pub struct HttpBackend {
    cache: Arc<HttpCache>,
}

impl HttpBackend {
    /// Creates the backend over the process-wide cache.
    pub fn new(cache: Arc<HttpCache>) -> Self {
        Self { cache }
    }

    /// Runs one resolved request. The output is the response body: parsed
    /// JSON when the payload is JSON, the raw text otherwise.
    pub async fn run(&self, cfg: &HttpClientConfig) -> Result<Value, AppError> {
        with_timeout(cfg.timeout_duration, self.execute(cfg)).await
    }

    async fn execute(&self, cfg: &HttpClientConfig) -> Result<Value, AppError> {
        let method = cfg.get_method();
        let cache_cfg = cfg.cache.as_ref().filter(|c| c.enabled);
        let cache_key = cache_cfg.map(|c| {
            c.key
                .clone()
                .unwrap_or_else(|| HttpCache::request_key(&method, &cfg.url, cfg.data.as_ref()))
        });

        // Only GETs read from the cache; mutating methods always hit the network.
        if method == "GET" {
            if let Some(key) = &cache_key {
                if let Some(hit) = self.cache.get(key) {
                    tracing::debug!(url = %cfg.url, "http cache hit");
                    return Ok(hit.body);
                }
            }
        }

        let client = build_client(cfg)?;
        let retry = cfg.retry.clone().unwrap_or_default();
        let attempts = if cfg.retry.is_some() { retry.attempts() } else { 1 };

        let mut attempt = 0u32;
        loop {
            let request = build_request(&client, cfg, &method)?;
            match request.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if retry.should_retry_status(status) && attempt + 1 < attempts {
                        let delay = retry_after(&resp).unwrap_or_else(|| retry.delay(attempt));
                        tracing::debug!(status, attempt, "retrying http request");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    let body = read_body(resp).await?;
                    if status >= 400 {
                        return Err(AppError::new(
                            AppCode::ResourceFailed,
                            format!("http status {}", status),
                        )
                        .with_details("status", status)
                        .with_details("body", body));
                    }
                    if let (Some(cache_cfg), Some(key)) = (cache_cfg, &cache_key) {
                        // Non-GET responses only populate the cache under an
                        // explicit key.
                        if method == "GET" || cache_cfg.key.is_some() {
                            let ttl = cache_cfg.ttl.unwrap_or(Duration::from_secs(60));
                            self.cache.put(key.clone(), status, body.clone(), ttl);
                        }
                    }
                    return Ok(body);
                }
                Err(e) => {
                    if attempt + 1 < attempts {
                        tokio::time::sleep(retry.delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(classify_reqwest(e));
                }
            }
        }
    }
}

fn build_client(cfg: &HttpClientConfig) -> Result<reqwest::Client, AppError> {
    let mut builder = reqwest::Client::builder();
    if !cfg.follows_redirects() {
        builder = builder.redirect(reqwest::redirect::Policy::none());
    }
    if let Some(proxy) = &cfg.proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| AppError::new(AppCode::BadRequest, "invalid proxy url").with_error(e))?;
        builder = builder.proxy(proxy);
    }
    if let Some(tls) = &cfg.tls {
        if tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca) = &tls.ca_cert_path {
            let pem = std::fs::read(ca).map_err(|e| {
                AppError::new(AppCode::BadRequest, format!("read ca cert {}", ca)).with_error(e)
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| AppError::new(AppCode::BadRequest, "parse ca cert").with_error(e))?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert_path), Some(key_path)) = (&tls.client_cert_path, &tls.client_key_path) {
            let cert = std::fs::read(cert_path).map_err(|e| {
                AppError::new(AppCode::BadRequest, format!("read client cert {}", cert_path))
                    .with_error(e)
            })?;
            let key = std::fs::read(key_path).map_err(|e| {
                AppError::new(AppCode::BadRequest, format!("read client key {}", key_path))
                    .with_error(e)
            })?;
            let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key)
                .map_err(|e| AppError::new(AppCode::BadRequest, "parse client identity").with_error(e))?;
            builder = builder.identity(identity);
        }
    }
    builder
        .build()
        .map_err(|e| AppError::new(AppCode::InternalError, "build http client").with_error(e))
}

fn build_request(
    client: &reqwest::Client,
    cfg: &HttpClientConfig,
    method: &str,
) -> Result<reqwest::RequestBuilder, AppError> {
    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|e| AppError::new(AppCode::BadRequest, "invalid http method").with_error(e))?;
    let mut req = client.request(method, &cfg.url);
    for (name, value) in &cfg.headers {
        req = req.header(name, value);
    }
    if let Some(auth) = &cfg.auth {
        req = match auth.kind {
            HttpAuthKind::Basic => req.basic_auth(
                auth.username.clone().unwrap_or_default(),
                auth.password.clone(),
            ),
            HttpAuthKind::Bearer | HttpAuthKind::Oauth2 => {
                req.bearer_auth(auth.token.clone().unwrap_or_default())
            }
            HttpAuthKind::ApiKey => req.header(
                auth.header.as_deref().unwrap_or("X-Api-Key"),
                auth.api_key.clone().unwrap_or_default(),
            ),
        };
    }
    if let Some(data) = &cfg.data {
        req = match data {
            Value::String(raw) => req.body(raw.clone()),
            other => req.json(other),
        };
    }
    Ok(req)
}

/// `Retry-After` (delta-seconds form) takes precedence over computed backoff.
fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn read_body(resp: reqwest::Response) -> Result<Value, AppError> {
    let text = resp.text().await.map_err(classify_reqwest)?;
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend() -> HttpBackend {
        HttpBackend::new(Arc::new(HttpCache::new()))
    }

    fn get_cfg(url: String) -> HttpClientConfig {
        serde_yaml::from_str(&format!("url: {}", url)).unwrap()
    }

    #[tokio::test]
    async fn get_returns_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"x": 1})))
            .mount(&server)
            .await;
        let out = backend().run(&get_cfg(format!("{}/a", server.uri()))).await.unwrap();
        assert_eq!(out, json!({"x": 1}));
    }

    /// **Scenario**: retry with backoff — 503, 503, 200 under
    /// `maxAttempts=3, backoff=100ms, retryOn=[503]` makes three attempts,
    /// sleeps at least 200 ms total, and returns the 200 body.
    #[tokio::test]
    async fn retry_backoff_scenario() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let cfg: HttpClientConfig = serde_yaml::from_str(&format!(
            "url: {}/flaky\nretry:\n  maxAttempts: 3\n  backoff: 100ms\n  retryOn: [503]",
            server.uri()
        ))
        .unwrap();

        let started = Instant::now();
        let out = backend().run(&cfg).await.unwrap();
        assert_eq!(out, json!({"ok": true}));
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn no_retry_without_retry_config() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let err = backend()
            .run(&get_cfg(format!("{}/down", server.uri())))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AppCode::ResourceFailed);
        assert_eq!(err.detail("status"), Some(&json!(503)));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    /// **Scenario**: a cached GET bypasses the network inside its TTL.
    #[tokio::test]
    async fn cache_bypasses_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cached"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"n": 1})))
            .expect(1)
            .mount(&server)
            .await;
        let cfg: HttpClientConfig = serde_yaml::from_str(&format!(
            "url: {}/cached\ncache:\n  enabled: true\n  ttl: 60s",
            server.uri()
        ))
        .unwrap();
        let b = backend();
        assert_eq!(b.run(&cfg).await.unwrap(), json!({"n": 1}));
        assert_eq!(b.run(&cfg).await.unwrap(), json!({"n": 1}));
    }

    #[tokio::test]
    async fn post_never_reads_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/w"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"n": 2})))
            .expect(2)
            .mount(&server)
            .await;
        let cfg: HttpClientConfig = serde_yaml::from_str(&format!(
            "method: POST\nurl: {}/w\ncache:\n  enabled: true\n  ttl: 60s\n  key: explicit",
            server.uri()
        ))
        .unwrap();
        let b = backend();
        b.run(&cfg).await.unwrap();
        b.run(&cfg).await.unwrap();
        // But the explicit key was populated for GET readers.
        assert!(b.cache.get("explicit").is_some());
    }

    #[tokio::test]
    async fn auth_headers_applied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sec"))
            .and(header("Authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("ok")))
            .mount(&server)
            .await;
        let cfg: HttpClientConfig = serde_yaml::from_str(&format!(
            "url: {}/sec\nauth:\n  type: bearer\n  token: t0ken",
            server.uri()
        ))
        .unwrap();
        assert_eq!(backend().run(&cfg).await.unwrap(), json!("ok"));
    }

    /// **Scenario**: `Retry-After` beats the computed backoff.
    #[tokio::test]
    async fn retry_after_takes_precedence() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ra"))
            .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ra"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("late")))
            .mount(&server)
            .await;
        let cfg: HttpClientConfig = serde_yaml::from_str(&format!(
            "url: {}/ra\nretry:\n  maxAttempts: 2\n  backoff: 1ms",
            server.uri()
        ))
        .unwrap();
        let started = Instant::now();
        assert_eq!(backend().run(&cfg).await.unwrap(), json!("late"));
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn timeout_classifies_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;
        let cfg: HttpClientConfig = serde_yaml::from_str(&format!(
            "url: {}/slow\ntimeout: 50ms",
            server.uri()
        ))
        .unwrap();
        let err = backend().run(&cfg).await.unwrap_err();
        assert_eq!(err.code(), AppCode::Timeout);
    }
}
