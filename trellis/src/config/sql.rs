//! SQL action configuration: connections, pools, queries, transactions.

use std::time::Duration;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

use crate::config::decode;

/// Connection pool bounds for a SQL connection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    #[serde(deserialize_with = "decode::flex_u32", skip_serializing_if = "is_zero_u32")]
    pub max_connections: u32,
    #[serde(deserialize_with = "decode::flex_u32", skip_serializing_if = "is_zero_u32")]
    pub min_connections: u32,
    #[serde(
        deserialize_with = "decode::flex_duration_opt",
        serialize_with = "decode::duration_opt_to_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_idle_time: Option<Duration>,
    #[serde(
        deserialize_with = "decode::flex_duration_opt",
        serialize_with = "decode::duration_opt_to_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_timeout: Option<Duration>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

impl PoolConfig {
    /// Concurrency bound, at least one.
    pub fn effective_max(&self) -> u32 {
        self.max_connections.max(1)
    }
}

/// One statement in multi-statement mode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub query: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<serde_json::Value>,
    /// When set, the statement executes once per parameter row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params_batch: Option<Vec<Vec<serde_json::Value>>>,
}

/// Result serialization format. Unknown names decode but fall back to JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlFormat {
    #[default]
    Json,
    Csv,
}

impl<'de> Deserialize<'de> for SqlFormat {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(match s.as_str() {
            "csv" => SqlFormat::Csv,
            _ => SqlFormat::Json,
        })
    }
}

/// SQL action: single-statement (`query` + `params`) or multi-statement
/// (`queries`, optionally in one transaction).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SqlConfig {
    /// Name resolved through `workflow.settings.sqlConnections`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
    /// Inline DSN, used when no `connectionName` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<serde_json::Value>,
    #[serde(deserialize_with = "decode::flex_bool", skip_serializing_if = "std::ops::Not::not")]
    pub transaction: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<SqlQuery>,
    #[serde(skip_serializing_if = "is_default_format")]
    pub format: SqlFormat,
    #[serde(
        alias = "timeout",
        deserialize_with = "decode::flex_duration_opt",
        serialize_with = "decode::duration_opt_to_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_duration: Option<Duration>,
    /// Row cap; 0 leaves the result unbounded.
    #[serde(deserialize_with = "decode::flex_u32", skip_serializing_if = "is_zero_u32")]
    pub max_rows: u32,
}

fn is_default_format(f: &SqlFormat) -> bool {
    *f == SqlFormat::Json
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_and_multi_statement_forms() {
        let c: SqlConfig = serde_yaml::from_str(
            "connectionName: main\nquery: SELECT 1\nparams: [1, a]",
        )
        .unwrap();
        assert_eq!(c.connection_name.as_deref(), Some("main"));
        assert_eq!(c.query.as_deref(), Some("SELECT 1"));

        let c: SqlConfig = serde_yaml::from_str(
            "connection: sqlite://x.db\ntransaction: \"yes\"\nqueries:\n  - name: ins\n    query: INSERT INTO t VALUES (?1)\n    params: [5]",
        )
        .unwrap();
        assert!(c.transaction);
        assert_eq!(c.queries.len(), 1);
        assert_eq!(c.queries[0].name.as_deref(), Some("ins"));
    }

    /// **Scenario**: unknown formats decode and fall back to JSON.
    #[test]
    fn format_fallback() {
        let c: SqlConfig = serde_yaml::from_str("format: csv").unwrap();
        assert_eq!(c.format, SqlFormat::Csv);
        let c: SqlConfig = serde_yaml::from_str("format: parquet").unwrap();
        assert_eq!(c.format, SqlFormat::Json);
    }

    #[test]
    fn pool_bounds_with_string_scalars() {
        let p: PoolConfig = serde_yaml::from_str(
            "maxConnections: \"8\"\nminConnections: 2\nconnectionTimeout: 5s",
        )
        .unwrap();
        assert_eq!(p.effective_max(), 8);
        assert_eq!(p.connection_timeout, Some(Duration::from_secs(5)));
        assert_eq!(PoolConfig::default().effective_max(), 1);
    }

    #[test]
    fn max_rows_and_timeout_alias() {
        let c: SqlConfig = serde_yaml::from_str("maxRows: \"100\"\ntimeout: 3s").unwrap();
        assert_eq!(c.max_rows, 100);
        assert_eq!(c.timeout_duration, Some(Duration::from_secs(3)));
    }

    #[test]
    fn roundtrip() {
        let c: SqlConfig = serde_yaml::from_str(
            "connectionName: main\ntransaction: true\nqueries:\n  - query: DELETE FROM t\nformat: csv\nmaxRows: 10",
        )
        .unwrap();
        let y = serde_yaml::to_string(&c).unwrap();
        let back: SqlConfig = serde_yaml::from_str(&y).unwrap();
        assert_eq!(back, c);
    }
}
