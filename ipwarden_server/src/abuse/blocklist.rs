//! IP block list: hot-path membership checks and administrative mutations

use crate::store::{BlockList, StoreError};
use ipwarden_common::{canonical_ip, AddressError, BlockIpResponse, BlockStatus, UnblockIpResponse};
use tracing::{info, warn};

/// Result of checking a request address against the block list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCheck {
    /// Address is not blocked
    Clear,
    /// Address is blocked
    Blocked,
    /// Store failed; request allowed (fail-open)
    Degraded,
    /// No address to check
    Skipped,
}

impl BlockCheck {
    pub fn is_blocked(&self) -> bool {
        matches!(self, BlockCheck::Blocked)
    }
}

/// Check an address, failing open on storage errors
pub async fn check_address(blocklist: &dyn BlockList, address: Option<&str>) -> BlockCheck {
    let Some(address) = address else {
        return BlockCheck::Skipped;
    };

    match blocklist.contains(address).await {
        Ok(true) => BlockCheck::Blocked,
        Ok(false) => BlockCheck::Clear,
        Err(e) => {
            warn!(ip = %address, error = %e, "Block list check failed, allowing request");
            BlockCheck::Degraded
        }
    }
}

/// Administrative block list errors
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Validate, canonicalize and block an address.
///
/// Blocking an address twice is not an error; the second call reports
/// `BlockStatus::AlreadyBlocked`.
pub async fn block_ip(blocklist: &dyn BlockList, raw: &str) -> Result<BlockIpResponse, BlockError> {
    let ip = canonical_ip(raw)?.to_string();

    let status = if blocklist.insert(&ip).await? {
        info!(ip = %ip, "Blocked IP added");
        BlockStatus::Added
    } else {
        info!(ip = %ip, "IP already blocked");
        BlockStatus::AlreadyBlocked
    };

    Ok(BlockIpResponse { ip, status })
}

/// Validate, canonicalize and unblock an address
pub async fn unblock_ip(blocklist: &dyn BlockList, raw: &str) -> Result<UnblockIpResponse, BlockError> {
    let ip = canonical_ip(raw)?.to_string();
    let removed = blocklist.remove(&ip).await?;

    if removed {
        info!(ip = %ip, "Blocked IP removed");
    }

    Ok(UnblockIpResponse { ip, removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_block_is_idempotent() {
        let store = MemoryStore::new();

        let first = block_ip(&store, "198.51.100.7").await.unwrap();
        assert_eq!(first.status, BlockStatus::Added);
        assert_eq!(first.ip, "198.51.100.7");

        let second = block_ip(&store, "198.51.100.7").await.unwrap();
        assert_eq!(second.status, BlockStatus::AlreadyBlocked);

        assert_eq!(store.blocked_count(), 1);
    }

    #[tokio::test]
    async fn test_block_canonicalizes_ipv6() {
        let store = MemoryStore::new();

        let first = block_ip(&store, " 2001:DB8:0:0:0:0:0:1 ").await.unwrap();
        assert_eq!(first.ip, "2001:db8::1");

        let second = block_ip(&store, "2001:db8::1").await.unwrap();
        assert_eq!(second.status, BlockStatus::AlreadyBlocked);
        assert_eq!(store.blocked_count(), 1);
    }

    #[tokio::test]
    async fn test_block_rejects_invalid_address() {
        let store = MemoryStore::new();

        let err = block_ip(&store, "300.1.2.3").await.unwrap_err();
        assert!(matches!(err, BlockError::InvalidAddress(AddressError::Invalid(_))));
        assert_eq!(err.to_string(), "'300.1.2.3' is not a valid IP address");

        assert!(matches!(
            block_ip(&store, "").await,
            Err(BlockError::InvalidAddress(AddressError::Empty))
        ));
        assert_eq!(store.blocked_count(), 0);
    }

    #[tokio::test]
    async fn test_block_propagates_store_errors() {
        let store = MemoryStore::new();
        store.set_failing(true);

        assert!(matches!(block_ip(&store, "198.51.100.7").await, Err(BlockError::Store(_))));
    }

    #[tokio::test]
    async fn test_unblock() {
        let store = MemoryStore::new();
        block_ip(&store, "198.51.100.7").await.unwrap();

        assert!(unblock_ip(&store, "198.51.100.7").await.unwrap().removed);
        assert!(!unblock_ip(&store, "198.51.100.7").await.unwrap().removed);
        assert_eq!(store.blocked_count(), 0);
    }

    #[tokio::test]
    async fn test_check_address() {
        let store = MemoryStore::new();
        block_ip(&store, "198.51.100.7").await.unwrap();

        assert_eq!(check_address(&store, Some("198.51.100.7")).await, BlockCheck::Blocked);
        assert_eq!(check_address(&store, Some("198.51.100.8")).await, BlockCheck::Clear);
        assert_eq!(check_address(&store, None).await, BlockCheck::Skipped);
    }

    #[tokio::test]
    async fn test_check_address_fails_open() {
        let store = MemoryStore::new();
        block_ip(&store, "198.51.100.7").await.unwrap();
        store.set_failing(true);

        let check = check_address(&store, Some("198.51.100.7")).await;
        assert_eq!(check, BlockCheck::Degraded);
        assert!(!check.is_blocked());
    }
}
