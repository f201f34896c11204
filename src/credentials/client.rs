use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Key payload returned by the key manager's "get" endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyData {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub region: Option<String>,
}

/// Health report sent back to the key manager.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyStatus {
    pub key: String,
    pub code: u16,
    pub note: String,
}

#[derive(Debug, Deserialize)]
struct GetKeyResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<KeyData>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// The external service that owns the key pools.
///
/// Cooldown and health bookkeeping live on the other side of this trait;
/// callers only fetch keys and report how they behaved.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// `Ok(None)` means the manager answered but had no key to hand out.
    async fn fetch(&self, pool: &str, region: &str) -> Result<Option<KeyData>>;

    async fn report(&self, pool: &str, status: &KeyStatus) -> Result<()>;
}

pub struct HttpKeyManager {
    client: Client,
    base_url: Url,
}

impl HttpKeyManager {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid key manager url '{}': {}", base_url, e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, pool: &str, operation: &str) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let pool = pool.trim_matches('/');
        let raw = if pool.is_empty() {
            format!("{}/keys/{}", base, operation)
        } else {
            format!("{}/{}/keys/{}", base, pool, operation)
        };
        Url::parse(&raw).map_err(|e| Error::Config(format!("invalid key manager endpoint '{}': {}", raw, e)))
    }
}

#[async_trait]
impl KeyManager for HttpKeyManager {
    async fn fetch(&self, pool: &str, region: &str) -> Result<Option<KeyData>> {
        let url = self.endpoint(pool, "get")?;
        let response: GetKeyResponse = self
            .client
            .get(url)
            .query(&[("region", region)])
            .send()
            .await?
            .json()
            .await?;

        if !response.success {
            let reason = response
                .message
                .or(response.error)
                .unwrap_or_else(|| "unknown reason".to_string());
            return Err(Error::KeyManager(format!("pool '{}' refused key request: {}", pool, reason)));
        }

        Ok(response.data.filter(|data| !data.key.is_empty()))
    }

    async fn report(&self, pool: &str, status: &KeyStatus) -> Result<()> {
        let url = self.endpoint(pool, "status")?;
        let response: StatusResponse = self
            .client
            .post(url)
            .json(status)
            .send()
            .await?
            .json()
            .await?;

        if response.success {
            Ok(())
        } else {
            Err(Error::KeyManager(format!(
                "status report rejected: {}",
                response.error.unwrap_or_else(|| "unknown reason".to_string())
            )))
        }
    }
}
