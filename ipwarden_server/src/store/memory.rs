//! In-memory store for tests

use super::{AddressCount, AddressPath, AuditLog, BlockList, FlagStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipwarden_common::{AuditEntry, BlockedIp, SuspiciousIp};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Block list, audit log and flag store in one process-local struct.
///
/// `set_failing(true)` makes every call return `StoreError::Unavailable`.
#[derive(Default)]
pub struct MemoryStore {
    blocked: Mutex<BTreeMap<String, DateTime<Utc>>>,
    entries: Mutex<Vec<AuditEntry>>,
    flags: Mutex<Vec<SuspiciousIp>>,
    failing: AtomicBool,
    block_checks: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn flags(&self) -> Vec<SuspiciousIp> {
        self.flags.lock().unwrap().clone()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.lock().unwrap().len()
    }

    pub fn block_checks(&self) -> usize {
        self.block_checks.load(Ordering::SeqCst)
    }

    /// Seed an audit entry directly, bypassing the failure switch
    pub fn push_entry(&self, entry: AuditEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn window(&self, cutoff: DateTime<Utc>) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.timestamp >= cutoff && e.address.is_some())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BlockList for MemoryStore {
    async fn contains(&self, address: &str) -> Result<bool, StoreError> {
        self.block_checks.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.blocked.lock().unwrap().contains_key(address))
    }

    async fn insert(&self, address: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut blocked = self.blocked.lock().unwrap();
        if blocked.contains_key(address) {
            return Ok(false);
        }
        blocked.insert(address.to_string(), Utc::now());
        Ok(true)
    }

    async fn remove(&self, address: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.blocked.lock().unwrap().remove(address).is_some())
    }

    async fn list(&self) -> Result<Vec<BlockedIp>, StoreError> {
        self.check()?;
        Ok(self
            .blocked
            .lock()
            .unwrap()
            .iter()
            .map(|(address, created_at)| BlockedIp {
                address: address.clone(),
                created_at: Some(*created_at),
            })
            .collect())
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.check()?;
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn counts_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<AddressCount>, StoreError> {
        self.check()?;
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for entry in self.window(cutoff) {
            if let Some(address) = entry.address {
                *counts.entry(address).or_insert(0) += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(address, count)| AddressCount { address, count })
            .collect())
    }

    async fn paths_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<AddressPath>, StoreError> {
        self.check()?;
        let pairs: BTreeSet<(String, String)> = self
            .window(cutoff)
            .into_iter()
            .filter_map(|e| e.address.map(|a| (a, e.path)))
            .collect();
        Ok(pairs
            .into_iter()
            .map(|(address, path)| AddressPath { address, path })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}

#[async_trait]
impl FlagStore for MemoryStore {
    async fn flag(&self, address: &str, reason: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut flags = self.flags.lock().unwrap();
        if flags.iter().any(|f| f.address == address && f.reason == reason) {
            return Ok(false);
        }
        flags.push(SuspiciousIp {
            address: address.to_string(),
            reason: reason.to_string(),
            first_seen: Some(Utc::now()),
        });
        Ok(true)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<SuspiciousIp>, StoreError> {
        self.check()?;
        Ok(self.flags.lock().unwrap().iter().rev().take(limit).cloned().collect())
    }
}
