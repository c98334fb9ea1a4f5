//! Shared TTL cache for HTTP action responses.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// One cached response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Value,
    expires_at: Instant,
}

/// Process-wide response cache shared across requests. Entries are keyed by
/// the config's explicit `key` or by `(method, url, body digest)`.
#[derive(Default)]
pub struct HttpCache {
    entries: DashMap<String, CachedResponse>,
}

impl HttpCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The implicit cache key for a request without an explicit `key`.
    pub fn request_key(method: &str, url: &str, body: Option<&Value>) -> String {
        let mut hasher = Sha256::new();
        if let Some(b) = body {
            hasher.update(b.to_string().as_bytes());
        }
        let digest = hasher.finalize();
        format!("{}|{}|{:x}", method, url, digest)
    }

    /// Returns a live entry, dropping it when expired.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let hit = self.entries.get(key)?;
        if hit.expires_at <= Instant::now() {
            drop(hit);
            self.entries.remove(key);
            return None;
        }
        Some(hit.clone())
    }

    /// Stores a response for `ttl`.
    pub fn put(&self, key: String, status: u16, body: Value, ttl: Duration) {
        self.entries.insert(
            key,
            CachedResponse {
                status,
                body,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hit_until_expiry() {
        let cache = HttpCache::new();
        cache.put("k".into(), 200, json!({"a": 1}), Duration::from_secs(60));
        let hit = cache.get("k").unwrap();
        assert_eq!(hit.status, 200);
        assert_eq!(hit.body, json!({"a": 1}));
    }

    #[test]
    fn expired_entry_evicted_on_read() {
        let cache = HttpCache::new();
        cache.put("k".into(), 200, json!(1), Duration::from_millis(0));
        assert!(cache.get("k").is_none());
        assert!(cache.get("k").is_none());
    }

    /// **Scenario**: the implicit key distinguishes method, url, and body.
    #[test]
    fn request_key_components() {
        let a = HttpCache::request_key("GET", "http://x/a", None);
        let b = HttpCache::request_key("POST", "http://x/a", None);
        let c = HttpCache::request_key("GET", "http://x/b", None);
        let d = HttpCache::request_key("GET", "http://x/a", Some(&json!({"q": 1})));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a, HttpCache::request_key("GET", "http://x/a", None));
    }
}
