//! In-process session store: mutex-guarded map with an expiry min-heap so the
//! sweeper drops entries in O(log n) without scanning the whole map.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use super::{SessionError, SessionStore};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<(String, String), Entry>,
    /// (expiry, key) pairs; stale heap entries (overwritten keys) are skipped
    /// at sweep time by comparing against the live map.
    expiries: BinaryHeap<Reverse<(Instant, (String, String))>>,
}

/// Process-local store; contents are lost on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>, SessionError> {
        let inner = self.inner.lock().map_err(lock_err)?;
        let found = inner
            .entries
            .get(&(session_id.to_string(), key.to_string()))
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone());
        Ok(found)
    }

    async fn set(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().map_err(lock_err)?;
        let map_key = (session_id.to_string(), key.to_string());
        let expires_at = Instant::now() + ttl;
        inner.entries.insert(
            map_key.clone(),
            Entry { value, expires_at },
        );
        inner.expiries.push(Reverse((expires_at, map_key)));
        Ok(())
    }

    async fn delete(&self, session_id: &str, key: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().map_err(lock_err)?;
        inner
            .entries
            .remove(&(session_id.to_string(), key.to_string()));
        Ok(())
    }

    async fn snapshot(
        &self,
        session_id: &str,
    ) -> Result<serde_json::Map<String, Value>, SessionError> {
        let inner = self.inner.lock().map_err(lock_err)?;
        let now = Instant::now();
        let mut out = serde_json::Map::new();
        for ((sid, key), entry) in &inner.entries {
            if sid == session_id && entry.expires_at > now {
                out.insert(key.clone(), entry.value.clone());
            }
        }
        Ok(out)
    }

    async fn sweep(&self) -> Result<usize, SessionError> {
        let mut inner = self.inner.lock().map_err(lock_err)?;
        let now = Instant::now();
        let mut removed = 0;
        while let Some(Reverse((expiry, key))) = inner.expiries.peek().cloned() {
            if expiry > now {
                break;
            }
            inner.expiries.pop();
            // Only drop the map entry if this heap record is still current;
            // an overwrite pushed a newer expiry for the same key.
            let still_expired = inner
                .entries
                .get(&key)
                .map(|e| e.expires_at <= now)
                .unwrap_or(false);
            if still_expired {
                inner.entries.remove(&key);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn lock_err<T>(_: std::sync::PoisonError<T>) -> SessionError {
    SessionError::Storage("session store mutex poisoned".to_string())
}
