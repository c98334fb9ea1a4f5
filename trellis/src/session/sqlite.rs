//! SQLite-backed session store. Persistent across process restarts.
//!
//! Schema: `(key TEXT PRIMARY KEY, value BLOB, expires_at INTEGER)` where
//! `key` is `<session-id> 0x1f <entry-key>` and `expires_at` is unix millis.
//! Blocking rusqlite work runs on the blocking pool.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::params;
use serde_json::Value;

use super::{SessionError, SessionStore};

/// Separator between session id and entry key inside the primary key.
const KEY_SEP: char = '\u{1f}';

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn composite_key(session_id: &str, key: &str) -> String {
    format!("{}{}{}", session_id, KEY_SEP, key)
}

/// Persistent store at a SQLite file path.
pub struct SqliteSessionStore {
    db_path: std::path::PathBuf,
}

impl SqliteSessionStore {
    /// Opens (creating if needed) the database and ensures the table exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS session_kv (
                key TEXT PRIMARY KEY,
                value BLOB,
                expires_at INTEGER
            )
            "#,
            [],
        )
        .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            f(&conn).map_err(|e| SessionError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| SessionError::Storage(e.to_string()))?
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>, SessionError> {
        let ck = composite_key(session_id, key);
        let now = now_millis();
        let blob: Option<Vec<u8>> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT value FROM session_kv WHERE key = ?1 AND expires_at >= ?2",
                )?;
                match stmt.query_row(params![ck, now], |row| row.get(0)) {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;
        match blob {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let ck = composite_key(session_id, key);
        let bytes = serde_json::to_vec(&value)?;
        let expires_at = now_millis() + ttl.as_millis() as i64;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO session_kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
                params![ck, bytes, expires_at],
            )
            .map(|_| ())
        })
        .await
    }

    async fn delete(&self, session_id: &str, key: &str) -> Result<(), SessionError> {
        let ck = composite_key(session_id, key);
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM session_kv WHERE key = ?1", params![ck])
                .map(|_| ())
        })
        .await
    }

    async fn snapshot(
        &self,
        session_id: &str,
    ) -> Result<serde_json::Map<String, Value>, SessionError> {
        // Range scan over the composite-key prefix; avoids LIKE escaping.
        let lo = format!("{}{}", session_id, KEY_SEP);
        let hi = format!("{}{}", session_id, char::from_u32(KEY_SEP as u32 + 1).unwrap());
        let now = now_millis();
        let rows: Vec<(String, Vec<u8>)> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, value FROM session_kv WHERE key >= ?1 AND key < ?2 AND expires_at >= ?3",
                )?;
                let rows = stmt
                    .query_map(params![lo, hi, now], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        let mut out = serde_json::Map::new();
        for (composite, bytes) in rows {
            let entry_key = composite
                .split_once(KEY_SEP)
                .map(|(_, k)| k.to_string())
                .unwrap_or(composite);
            out.insert(entry_key, serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    async fn sweep(&self) -> Result<usize, SessionError> {
        let now = now_millis();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM session_kv WHERE expires_at < ?1", params![now])
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, SqliteSessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let s = SqliteSessionStore::new(dir.path().join("sessions.db")).unwrap();
        (dir, s)
    }

    #[tokio::test]
    async fn set_get_roundtrip() {
        let (_dir, s) = store();
        s.set("sid", "k", json!({"a": 1}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(s.get("sid", "k").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(s.get("sid", "missing").await.unwrap(), None);
    }

    /// **Scenario**: values survive a store reopen (persistence contract).
    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        {
            let s = SqliteSessionStore::new(&path).unwrap();
            s.set("sid", "k", json!("kept"), Duration::from_secs(60))
                .await
                .unwrap();
        }
        let s = SqliteSessionStore::new(&path).unwrap();
        assert_eq!(s.get("sid", "k").await.unwrap(), Some(json!("kept")));
    }

    /// **Scenario**: the sweeper deletes rows whose `expires_at` has passed.
    #[tokio::test]
    async fn sweep_deletes_expired_rows() {
        let (_dir, s) = store();
        s.set("sid", "old", json!(1), Duration::from_millis(0))
            .await
            .unwrap();
        s.set("sid", "new", json!(2), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let removed = s.sweep().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(s.get("sid", "new").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn snapshot_is_session_scoped() {
        let (_dir, s) = store();
        s.set("a", "x", json!(1), Duration::from_secs(60))
            .await
            .unwrap();
        s.set("b", "x", json!(2), Duration::from_secs(60))
            .await
            .unwrap();
        let snap = s.snapshot("a").await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get("x"), Some(&json!(1)));
    }
}
