pub mod cache;
pub mod client;
pub mod service;

use chrono::{DateTime, Utc};
use std::fmt;

pub use cache::CredentialCache;
pub use client::{HttpKeyManager, KeyData, KeyManager, KeyStatus};
pub use service::CredentialService;

/// A subscription key handed out by the key manager for one region.
///
/// Replaced wholesale on every successful refresh; never mutated in place.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub key: String,
    pub region: String,
    pub fetched_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(key: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            region: region.into(),
            fetched_at: Utc::now(),
        }
    }

    /// Short form of the key that is safe to put in logs.
    pub fn abbreviated(&self) -> String {
        abbreviate(&self.key)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &self.abbreviated())
            .field("region", &self.region)
            .field("fetched_at", &self.fetched_at)
            .finish()
    }
}

pub fn abbreviate(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 8 {
        return key.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviation_keeps_both_ends() {
        assert_eq!(abbreviate("0123456789abcdef"), "0123...cdef");
        assert_eq!(abbreviate("short"), "short");
        assert_eq!(abbreviate(""), "");
    }

    #[test]
    fn debug_output_hides_the_key() {
        let credential = Credential::new("supersecretkey123", "eastasia");
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("supersecretkey123"));
        assert!(debug.contains("supe...y123"));
    }
}
