use super::{Credential, KeyManager, KeyStatus};
use crate::error::{Error, Result};
use crate::record::Outcome;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Single-slot holder of the freshest credential for one pool.
///
/// The slot is only touched under `slot`'s lock for the duration of a copy or
/// a swap; fetching from the key manager happens outside of it.
pub struct CredentialCache {
    pool: String,
    region: String,
    manager: Arc<dyn KeyManager>,
    slot: Mutex<Option<Credential>>,
    refresher_started: AtomicBool,
}

impl CredentialCache {
    pub fn new(pool: impl Into<String>, region: impl Into<String>, manager: Arc<dyn KeyManager>) -> Self {
        Self {
            pool: pool.into(),
            region: region.into(),
            manager,
            slot: Mutex::new(None),
            refresher_started: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Fetches a key and swaps it into the slot.
    ///
    /// Returns `true` when the slot was replaced. Failures leave the previous
    /// credential in place.
    pub async fn refresh(&self) -> bool {
        let data = match self.manager.fetch(&self.pool, &self.region).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                log::warn!("Key manager returned no key for pool '{}'", self.pool);
                return false;
            }
            Err(e) => {
                log::warn!("Refreshing key for pool '{}' failed: {}", self.pool, e);
                return false;
            }
        };

        let fresh = Credential::new(data.key, data.region.unwrap_or_else(|| self.region.clone()));
        let mut slot = self.slot.lock().await;
        match slot.as_ref() {
            None => log::info!(
                "Initialized key for pool '{}': {} ({})",
                self.pool,
                fresh.abbreviated(),
                fresh.region
            ),
            Some(old) if old.key != fresh.key => log::info!(
                "Rotated key for pool '{}': {} -> {} ({})",
                self.pool,
                old.abbreviated(),
                fresh.abbreviated(),
                fresh.region
            ),
            Some(_) => log::debug!("Key for pool '{}' unchanged", self.pool),
        }
        *slot = Some(fresh);
        true
    }

    /// Copy of the current credential, if any refresh has succeeded yet.
    pub async fn current(&self) -> Option<Credential> {
        self.slot.lock().await.clone()
    }

    pub async fn get(&self, max_attempts: u32, retry_interval: Duration) -> Result<Credential> {
        let attempts = max_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(credential) = self.current().await {
                return Ok(credential);
            }
            log::debug!(
                "No key cached for pool '{}' yet (attempt {}/{})",
                self.pool,
                attempt,
                attempts
            );
            if attempt < attempts {
                sleep(retry_interval).await;
            }
        }

        Err(Error::CredentialUnavailable {
            pool: self.pool.clone(),
            attempts,
        })
    }

    /// Forwards a non-success outcome to the key manager.
    ///
    /// Successes are dropped here. Delivery failures are logged, never retried.
    pub async fn report_outcome(&self, credential: &Credential, outcome: Outcome, code: u16, note: &str) {
        if outcome.is_success() {
            return;
        }

        let status = KeyStatus {
            key: credential.key.clone(),
            code,
            note: note.to_string(),
        };
        match self.manager.report(&self.pool, &status).await {
            Ok(()) => log::debug!(
                "Reported {} ({}) for key {} in pool '{}'",
                outcome,
                code,
                credential.abbreviated(),
                self.pool
            ),
            Err(e) => log::warn!(
                "Reporting {} for key {} in pool '{}' failed: {}",
                outcome,
                credential.abbreviated(),
                self.pool,
                e
            ),
        }
    }

    /// Starts the background refresh loop. Only one loop may ever run per cache.
    pub fn spawn_refresher(
        self: &Arc<Self>,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>> {
        if self.refresher_started.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal(format!(
                "refresher for pool '{}' already started",
                self.pool
            )));
        }

        let cache = Arc::clone(self);
        Ok(tokio::spawn(async move {
            log::info!(
                "Started key refresher for pool '{}' (every {:?})",
                cache.pool,
                interval
            );
            while !*stop.borrow() {
                cache.refresh().await;
                tokio::select! {
                    _ = sleep(interval) => {}
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            log::info!("Stopped key refresher for pool '{}'", cache.pool);
        }))
    }
}
