//! SQL action backend over SQLite connections.
//!
//! Connections resolve by `connectionName` (through the workflow's
//! `sqlConnections`) or by inline DSN (`sqlite://path`, a plain path, or
//! `:memory:`). Each distinct DSN gets a semaphore-bounded pool; blocking
//! rusqlite work runs on the blocking pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::app_error::{AppCode, AppError};
use crate::backend::with_timeout;
use crate::config::{PoolConfig, SqlConfig, SqlConnection, SqlFormat, SqlQuery};

struct Pool {
    permits: Semaphore,
    connect_timeout: Option<Duration>,
}

/// Executes `sql` actions.
pub struct SqlBackend {
    connections: BTreeMap<String, SqlConnection>,
    pools: DashMap<String, Arc<Pool>>,
}

impl SqlBackend {
    /// Creates the backend over the workflow's named connections.
    pub fn new(connections: BTreeMap<String, SqlConnection>) -> Self {
        Self {
            connections,
            pools: DashMap::new(),
        }
    }

    /// Runs one resolved config. Single-statement mode returns the rows of
    /// `query`; multi-statement mode returns an object keyed by query name.
    pub async fn run(&self, cfg: &SqlConfig) -> Result<Value, AppError> {
        with_timeout(cfg.timeout_duration, self.execute(cfg)).await
    }

    async fn execute(&self, cfg: &SqlConfig) -> Result<Value, AppError> {
        let (dsn, pool_cfg) = self.resolve_connection(cfg)?;
        let pool = self.pool_for(&dsn, &pool_cfg);

        let permit = match pool.connect_timeout {
            Some(d) => tokio::time::timeout(d, pool.permits.acquire())
                .await
                .map_err(|_| {
                    AppError::new(AppCode::Timeout, "timed out waiting for a sql connection")
                })?,
            None => pool.permits.acquire().await,
        }
        .map_err(|_| AppError::new(AppCode::ServiceUnavailable, "sql pool closed"))?;

        let statements = if let Some(query) = &cfg.query {
            vec![SqlQuery {
                name: None,
                query: query.clone(),
                params: cfg.params.clone(),
                params_batch: None,
            }]
        } else {
            cfg.queries.clone()
        };
        if statements.is_empty() {
            return Err(AppError::new(
                AppCode::ResourceFailed,
                "sql action declares neither query nor queries",
            ));
        }

        let single = cfg.query.is_some();
        let transaction = cfg.transaction;
        let max_rows = cfg.max_rows;
        let format = cfg.format;
        let path = dsn_to_path(&dsn);

        let result = tokio::task::spawn_blocking(move || {
            run_statements(&path, &statements, transaction, max_rows, format, single)
        })
        .await
        .map_err(|e| AppError::new(AppCode::InternalError, "sql worker panicked").with_error(e))?;

        drop(permit);
        result
    }

    fn resolve_connection(&self, cfg: &SqlConfig) -> Result<(String, PoolConfig), AppError> {
        if let Some(name) = &cfg.connection_name {
            let conn = self.connections.get(name).ok_or_else(|| {
                AppError::new(
                    AppCode::ResourceFailed,
                    format!("unknown sql connection '{}'", name),
                )
            })?;
            let pool = cfg
                .pool
                .clone()
                .or_else(|| conn.pool.clone())
                .unwrap_or_default();
            return Ok((conn.connection.clone(), pool));
        }
        if let Some(dsn) = &cfg.connection {
            return Ok((dsn.clone(), cfg.pool.clone().unwrap_or_default()));
        }
        Err(AppError::new(
            AppCode::ResourceFailed,
            "sql action has no connection",
        ))
    }

    fn pool_for(&self, dsn: &str, cfg: &PoolConfig) -> Arc<Pool> {
        self.pools
            .entry(dsn.to_string())
            .or_insert_with(|| {
                Arc::new(Pool {
                    permits: Semaphore::new(cfg.effective_max() as usize),
                    connect_timeout: cfg.connection_timeout,
                })
            })
            .clone()
    }
}

fn dsn_to_path(dsn: &str) -> String {
    dsn.strip_prefix("sqlite://")
        .or_else(|| dsn.strip_prefix("sqlite:"))
        .unwrap_or(dsn)
        .to_string()
}

fn run_statements(
    path: &str,
    statements: &[SqlQuery],
    transaction: bool,
    max_rows: u32,
    format: SqlFormat,
    single: bool,
) -> Result<Value, AppError> {
    let mut conn = rusqlite::Connection::open(path)
        .map_err(|e| AppError::new(AppCode::ResourceFailed, "open sql connection").with_error(e))?;

    if transaction {
        let tx = conn
            .transaction()
            .map_err(|e| AppError::new(AppCode::ResourceFailed, "begin transaction").with_error(e))?;
        let mut results = serde_json::Map::new();
        for (i, stmt) in statements.iter().enumerate() {
            let name = statement_name(stmt, i);
            match run_one(&tx, stmt, max_rows, format) {
                Ok(v) => {
                    results.insert(name, v);
                }
                Err(e) => {
                    // Dropping the transaction rolls everything back.
                    return Err(e.with_details("failedQuery", name));
                }
            }
        }
        tx.commit()
            .map_err(|e| AppError::new(AppCode::ResourceFailed, "commit transaction").with_error(e))?;
        Ok(collapse(results, single))
    } else {
        let mut results = serde_json::Map::new();
        for (i, stmt) in statements.iter().enumerate() {
            let name = statement_name(stmt, i);
            let v = run_one(&conn, stmt, max_rows, format)
                .map_err(|e| e.with_details("failedQuery", name.clone()))?;
            results.insert(name, v);
        }
        Ok(collapse(results, single))
    }
}

fn statement_name(stmt: &SqlQuery, index: usize) -> String {
    stmt.name
        .clone()
        .unwrap_or_else(|| format!("query{}", index))
}

/// Single-statement mode unwraps the one entry; multi-statement mode keeps
/// the name→result object.
fn collapse(mut results: serde_json::Map<String, Value>, single: bool) -> Value {
    if single && results.len() == 1 {
        let key = results.keys().next().cloned().unwrap_or_default();
        results.remove(&key).unwrap_or(Value::Null)
    } else {
        Value::Object(results)
    }
}

fn run_one(
    conn: &rusqlite::Connection,
    stmt: &SqlQuery,
    max_rows: u32,
    format: SqlFormat,
) -> Result<Value, AppError> {
    let batches: Vec<&[Value]> = match &stmt.params_batch {
        Some(rows) => rows.iter().map(Vec::as_slice).collect(),
        None => vec![stmt.params.as_slice()],
    };

    let mut last = Value::Null;
    for params in batches {
        last = exec_once(conn, &stmt.query, params, max_rows, format)
            .map_err(|e| AppError::new(AppCode::ResourceFailed, "sql statement failed").with_error(e))?;
    }
    Ok(last)
}

fn exec_once(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[Value],
    max_rows: u32,
    format: SqlFormat,
) -> Result<Value, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let bound = params
        .iter()
        .map(to_sql_value)
        .collect::<Vec<rusqlite::types::Value>>();
    let bind: Vec<&dyn rusqlite::ToSql> =
        bound.iter().map(|v| v as &dyn rusqlite::ToSql).collect();

    if stmt.column_count() == 0 {
        let affected = stmt.execute(bind.as_slice())?;
        return Ok(json!({ "rowsAffected": affected }));
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query(bind.as_slice())?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        if max_rows > 0 && out.len() as u32 >= max_rows {
            break;
        }
        let mut object = serde_json::Map::new();
        for (i, col) in columns.iter().enumerate() {
            object.insert(col.clone(), column_value(row, i)?);
        }
        out.push(Value::Object(object));
    }

    Ok(match format {
        SqlFormat::Json => Value::Array(out),
        SqlFormat::Csv => Value::String(to_csv(&columns, &out)),
    })
}

fn to_sql_value(v: &Value) -> rusqlite::types::Value {
    match v {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

fn column_value(row: &rusqlite::Row<'_>, idx: usize) -> Result<Value, rusqlite::Error> {
    use rusqlite::types::ValueRef;
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    })
}

fn to_csv(columns: &[String], rows: &[Value]) -> String {
    let mut out = String::new();
    out.push_str(&columns.join(","));
    out.push('\n');
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| match row.get(c) {
                Some(Value::String(s)) => csv_escape(s),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

fn csv_escape(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_dsn(dir: &tempfile::TempDir) -> String {
        format!("sqlite://{}", dir.path().join("t.db").display())
    }

    fn backend() -> SqlBackend {
        SqlBackend::new(BTreeMap::new())
    }

    fn cfg(yaml: &str) -> SqlConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn create_insert_select() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = file_dsn(&dir);
        let b = backend();

        b.run(&cfg(&format!(
            "connection: {}\nquery: \"CREATE TABLE t (id INTEGER, name TEXT)\"",
            dsn
        )))
        .await
        .unwrap();
        let out = b
            .run(&cfg(&format!(
                "connection: {}\nquery: \"INSERT INTO t VALUES (?1, ?2)\"\nparams: [1, alice]",
                dsn
            )))
            .await
            .unwrap();
        assert_eq!(out, json!({ "rowsAffected": 1 }));

        let rows = b
            .run(&cfg(&format!(
                "connection: {}\nquery: \"SELECT id, name FROM t\"",
                dsn
            )))
            .await
            .unwrap();
        assert_eq!(rows, json!([{ "id": 1, "name": "alice" }]));
    }

    /// **Scenario**: the failing statement rolls
    /// back the whole transaction and names itself in `details.failedQuery`.
    #[tokio::test]
    async fn transaction_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = file_dsn(&dir);
        let b = backend();
        b.run(&cfg(&format!(
            "connection: {}\nquery: \"CREATE TABLE t (id INTEGER)\"",
            dsn
        )))
        .await
        .unwrap();

        let err = b
            .run(&cfg(&format!(
                "connection: {}\ntransaction: true\nqueries:\n  - name: ins\n    query: \"INSERT INTO t VALUES (1)\"\n  - name: bad\n    query: \"INVALID SQL\"",
                dsn
            )))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AppCode::ResourceFailed);
        assert_eq!(err.detail("failedQuery"), Some(&json!("bad")));

        let rows = b
            .run(&cfg(&format!(
                "connection: {}\nquery: \"SELECT id FROM t\"",
                dsn
            )))
            .await
            .unwrap();
        assert_eq!(rows, json!([]));
    }

    #[tokio::test]
    async fn named_connection_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let mut connections = BTreeMap::new();
        connections.insert(
            "main".to_string(),
            SqlConnection {
                connection: file_dsn(&dir),
                pool: None,
            },
        );
        let b = SqlBackend::new(connections);
        b.run(&cfg("connectionName: main\nquery: \"CREATE TABLE x (a)\""))
            .await
            .unwrap();

        let err = b
            .run(&cfg("connectionName: ghost\nquery: \"SELECT 1\""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AppCode::ResourceFailed);
    }

    #[tokio::test]
    async fn max_rows_caps_output() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = file_dsn(&dir);
        let b = backend();
        b.run(&cfg(&format!(
            "connection: {}\nquery: \"CREATE TABLE n (v INTEGER)\"",
            dsn
        )))
        .await
        .unwrap();
        b.run(&cfg(&format!(
            "connection: {}\nqueries:\n  - query: \"INSERT INTO n VALUES (?1)\"\n    paramsBatch: [[1], [2], [3], [4]]",
            dsn
        )))
        .await
        .unwrap();
        let rows = b
            .run(&cfg(&format!(
                "connection: {}\nquery: \"SELECT v FROM n ORDER BY v\"\nmaxRows: 2",
                dsn
            )))
            .await
            .unwrap();
        assert_eq!(rows, json!([{ "v": 1 }, { "v": 2 }]));
    }

    #[tokio::test]
    async fn csv_format() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = file_dsn(&dir);
        let b = backend();
        b.run(&cfg(&format!(
            "connection: {}\nquery: \"CREATE TABLE c (a TEXT, b INTEGER)\"",
            dsn
        )))
        .await
        .unwrap();
        b.run(&cfg(&format!(
            "connection: {}\nquery: \"INSERT INTO c VALUES ('x,y', 2)\"",
            dsn
        )))
        .await
        .unwrap();
        let out = b
            .run(&cfg(&format!(
                "connection: {}\nquery: \"SELECT a, b FROM c\"\nformat: csv",
                dsn
            )))
            .await
            .unwrap();
        assert_eq!(out, json!("a,b\n\"x,y\",2\n"));
    }

    #[tokio::test]
    async fn multi_statement_output_keyed_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = file_dsn(&dir);
        let b = backend();
        let out = b
            .run(&cfg(&format!(
                "connection: {}\nqueries:\n  - name: make\n    query: \"CREATE TABLE m (v)\"\n  - query: \"SELECT 1 AS one\"",
                dsn
            )))
            .await
            .unwrap();
        assert_eq!(out["make"], json!({ "rowsAffected": 0 }));
        assert_eq!(out["query1"], json!([{ "one": 1 }]));
    }
}
