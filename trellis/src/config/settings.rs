//! Workflow-level settings: server modes, API server routes and CORS, agent
//! environment, and named SQL connections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::decode;
use crate::config::input::InputConfig;
use crate::config::session::SessionConfig;
use crate::config::sql::PoolConfig;

/// Default bind address when `hostIp` is unset.
pub const DEFAULT_HOST_IP: &str = "0.0.0.0";
/// Default listen port when `portNum` is unset or non-positive.
pub const DEFAULT_PORT: u16 = 16395;

/// One declared API route.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
}

/// CORS settings. Absent fields take the documented defaults; an explicit
/// `enableCors: false` disables CORS verbatim.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsConfig {
    #[serde(
        default,
        deserialize_with = "decode::flex_bool_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub enable_cors: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_origins: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,
    #[serde(
        default,
        deserialize_with = "decode::flex_bool_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub allow_credentials: Option<bool>,
}

impl CorsConfig {
    fn default_methods() -> Vec<String> {
        ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn default_headers() -> Vec<String> {
        [
            "Content-Type",
            "Authorization",
            "Accept",
            "X-Requested-With",
            "X-Session-Id",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// The fully-defaulted configuration used when `apiServer.cors` is absent.
    pub fn defaults() -> Self {
        CorsConfig {
            enable_cors: Some(true),
            allow_origins: vec!["*".to_string()],
            allow_methods: Self::default_methods(),
            allow_headers: Self::default_headers(),
            allow_credentials: Some(true),
        }
    }

    /// Merges a partial override with the defaults: missing slices fall back,
    /// explicit values (including `enableCors: false`) are kept verbatim.
    pub fn merged(overrides: Option<&CorsConfig>) -> Self {
        let Some(o) = overrides else {
            return Self::defaults();
        };
        CorsConfig {
            enable_cors: Some(o.enable_cors.unwrap_or(true)),
            allow_origins: if o.allow_origins.is_empty() {
                vec!["*".to_string()]
            } else {
                o.allow_origins.clone()
            },
            allow_methods: if o.allow_methods.is_empty() {
                Self::default_methods()
            } else {
                o.allow_methods.clone()
            },
            allow_headers: if o.allow_headers.is_empty() {
                Self::default_headers()
            } else {
                o.allow_headers.clone()
            },
            allow_credentials: Some(o.allow_credentials.unwrap_or(true)),
        }
    }

    /// Whether CORS processing is on after merging.
    pub fn is_enabled(&self) -> bool {
        self.enable_cors.unwrap_or(true)
    }
}

/// API server block: declared routes, trusted proxies, CORS.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_proxies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsConfig>,
}

/// Agent-level environment: timezone, extra env vars merged into child
/// processes, and the Python venvs the agent provisions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub venvs: Vec<String>,
}

/// A named SQL connection: DSN plus optional pool bounds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlConnection {
    pub connection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolConfig>,
}

/// Top-level workflow settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSettings {
    #[serde(deserialize_with = "decode::flex_bool", skip_serializing_if = "std::ops::Not::not")]
    pub api_server_mode: bool,
    #[serde(deserialize_with = "decode::flex_bool", skip_serializing_if = "std::ops::Not::not")]
    pub web_server_mode: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host_ip: String,
    #[serde(deserialize_with = "decode::flex_u16", skip_serializing_if = "is_zero_u16")]
    pub port_num: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_server: Option<ApiServerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_server: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "is_default_agent_settings")]
    pub agent_settings: AgentSettings,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sql_connections: BTreeMap<String, SqlConnection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_app: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputConfig>,
}

fn is_zero_u16(v: &u16) -> bool {
    *v == 0
}

fn is_default_agent_settings(v: &AgentSettings) -> bool {
    *v == AgentSettings::default()
}

impl WorkflowSettings {
    /// Bind address, defaulting to `0.0.0.0` when unset.
    pub fn get_host_ip(&self) -> &str {
        if self.host_ip.is_empty() {
            DEFAULT_HOST_IP
        } else {
            &self.host_ip
        }
    }

    /// Listen port, defaulting to 16395 when unset or non-positive.
    pub fn get_port_num(&self) -> u16 {
        if self.port_num == 0 {
            DEFAULT_PORT
        } else {
            self.port_num
        }
    }

    /// The effective CORS configuration after default merging.
    pub fn effective_cors(&self) -> CorsConfig {
        CorsConfig::merged(self.api_server.as_ref().and_then(|a| a.cors.as_ref()))
    }

    /// Looks up a named SQL connection.
    pub fn sql_connection(&self, name: &str) -> Option<&SqlConnection> {
        self.sql_connections.get(name)
    }
}
