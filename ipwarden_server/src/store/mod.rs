//! Storage seams shared by the ingress pipeline and the anomaly scanner
//!
//! The Postgres implementations live in `crate::db`; an in-memory store backs
//! the unit tests.

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipwarden_common::{AuditEntry, BlockedIp, SuspiciousIp};

/// Errors from any backing store (database, cache, codec)
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] fred::error::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Request count for one address inside a scan window
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AddressCount {
    pub address: String,
    pub count: i64,
}

/// Distinct (address, path) pair inside a scan window
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AddressPath {
    pub address: String,
    pub path: String,
}

/// Durable set of denied addresses
#[async_trait]
pub trait BlockList: Send + Sync {
    /// Exact-match membership test
    async fn contains(&self, address: &str) -> Result<bool, StoreError>;

    /// Insert an address; returns `false` when it was already present
    async fn insert(&self, address: &str) -> Result<bool, StoreError>;

    /// Remove an address; returns `false` when it was not present
    async fn remove(&self, address: &str) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<BlockedIp>, StoreError>;
}

/// Append-only request audit trail
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// Entry counts per known address with `timestamp >= cutoff`
    async fn counts_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<AddressCount>, StoreError>;

    /// Distinct (address, path) pairs with a known address and `timestamp >= cutoff`
    async fn paths_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<AddressPath>, StoreError>;

    /// Connectivity check for health reporting
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Suspicious IP flags keyed on (address, reason)
#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Insert the flag if absent; returns whether a new row was created
    async fn flag(&self, address: &str, reason: &str) -> Result<bool, StoreError>;

    /// Most recent flags first
    async fn recent(&self, limit: usize) -> Result<Vec<SuspiciousIp>, StoreError>;
}
