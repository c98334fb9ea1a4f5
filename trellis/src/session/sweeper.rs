//! Background expiry sweeper.

use std::sync::Arc;
use std::time::Duration;

use super::SessionStore;

/// Periodically calls [`SessionStore::sweep`]. The task stops when the
/// `Sweeper` is dropped.
pub struct Sweeper {
    handle: tokio::task::JoinHandle<()>,
}

impl Sweeper {
    /// Spawns the sweep loop at `interval`.
    pub fn spawn(store: Arc<dyn SessionStore>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a fresh store is
            // not swept before anything can expire.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.sweep().await {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!("session sweep removed {} entries", n),
                    Err(e) => tracing::warn!("session sweep: {}", e),
                }
            }
        });
        Self { handle }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
