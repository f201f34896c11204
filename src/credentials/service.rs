use super::{CredentialCache, KeyManager};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Owns one [`CredentialCache`] and one refresh loop per pool.
///
/// Built once in the composition root and shut down explicitly when the
/// process is done with it.
pub struct CredentialService {
    caches: HashMap<String, Arc<CredentialCache>>,
    stop_tx: watch::Sender<bool>,
    refreshers: Vec<JoinHandle<()>>,
}

impl CredentialService {
    pub fn start<I, S>(
        manager: Arc<dyn KeyManager>,
        region: &str,
        pools: I,
        refresh_interval: Duration,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut caches = HashMap::new();
        let mut refreshers = Vec::new();

        for pool in pools {
            let pool = pool.into();
            if caches.contains_key(&pool) {
                continue;
            }
            let cache = Arc::new(CredentialCache::new(pool.clone(), region, manager.clone()));
            refreshers.push(cache.spawn_refresher(refresh_interval, stop_rx.clone())?);
            caches.insert(pool, cache);
        }

        Ok(Self {
            caches,
            stop_tx,
            refreshers,
        })
    }

    pub fn cache(&self, pool: &str) -> Option<Arc<CredentialCache>> {
        self.caches.get(pool).cloned()
    }

    pub fn pools(&self) -> impl Iterator<Item = &str> {
        self.caches.keys().map(String::as_str)
    }

    /// Signals every refresher to stop and waits for them to exit.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        for handle in self.refreshers {
            if let Err(e) = handle.await {
                log::warn!("Key refresher ended abnormally: {}", e);
            }
        }
    }
}
