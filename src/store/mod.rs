//! Per-identity state, keyed by email address.
//!
//! The pipeline never keeps identities in memory between messages; every
//! step goes through an [`IdentityStore`].

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::config::StoreConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Legacy sentinel written by older deployments for "reserved, no token yet".
pub const LEGACY_SENTINEL: &str = "null";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Where an identity is in the two-step issuance workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IdentityStatus {
    Reserved,
    LinkDispatched { url: String },
    TokenReceived { token: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    #[serde(flatten)]
    pub status: IdentityStatus,
    pub updated_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn new(status: IdentityStatus) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
        }
    }

    pub fn reserved() -> Self {
        Self::new(IdentityStatus::Reserved)
    }

    pub fn link_dispatched(url: impl Into<String>) -> Self {
        Self::new(IdentityStatus::LinkDispatched { url: url.into() })
    }

    pub fn token_received(token: impl Into<String>) -> Self {
        Self::new(IdentityStatus::TokenReceived {
            token: token.into(),
        })
    }

    /// Interpret a bare string value from the old `{address -> token}` layout.
    pub fn from_legacy(value: &str) -> Self {
        if value == LEGACY_SENTINEL {
            Self::reserved()
        } else {
            Self::token_received(value)
        }
    }

    pub fn token(&self) -> Option<&str> {
        match &self.status {
            IdentityStatus::TokenReceived { token } => Some(token.as_str()),
            _ => None,
        }
    }

    pub fn status_name(&self) -> &'static str {
        match self.status {
            IdentityStatus::Reserved => "reserved",
            IdentityStatus::LinkDispatched { .. } => "link_dispatched",
            IdentityStatus::TokenReceived { .. } => "token_received",
        }
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get(&self, address: &str) -> Result<Option<IdentityRecord>, StoreError>;

    async fn put(&self, address: &str, record: IdentityRecord) -> Result<(), StoreError>;

    /// Write `record` only when `address` has no value yet.
    ///
    /// Returns `true` when the write happened. Must be atomic with respect to
    /// other calls on the same store.
    async fn put_if_absent(
        &self,
        address: &str,
        record: IdentityRecord,
    ) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<String>, StoreError>;
}

pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn IdentityStore>, StoreError> {
    match config {
        StoreConfig::Memory => {
            log::warn!("Using in-memory identity store, nothing will be persisted");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreConfig::File { path } => Ok(Arc::new(FileStore::open(path)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_with_status_tag() {
        let record = IdentityRecord::token_received("ABC-123");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "token_received");
        assert_eq!(json["token"], "ABC-123");
        assert!(json["updated_at"].is_string());

        let back: IdentityRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_legacy_values() {
        assert_eq!(
            IdentityRecord::from_legacy("null").status,
            IdentityStatus::Reserved
        );
        assert_eq!(IdentityRecord::from_legacy("tok-1").token(), Some("tok-1"));
    }

    #[test]
    fn test_status_names() {
        assert_eq!(IdentityRecord::reserved().status_name(), "reserved");
        assert_eq!(
            IdentityRecord::link_dispatched("https://x").status_name(),
            "link_dispatched"
        );
        assert_eq!(IdentityRecord::reserved().token(), None);
    }
}
