//! Database connection, models and the Postgres store

use crate::store::{AddressCount, AddressPath, AuditLog, BlockList, FlagStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipwarden_common::{AuditEntry, BlockedIp, SuspiciousIp};
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Initialize the database connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(3))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Blocked address row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlockedIpRow {
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
}

impl From<BlockedIpRow> for BlockedIp {
    fn from(row: BlockedIpRow) -> Self {
        Self {
            address: row.ip_address,
            created_at: Some(row.created_at),
        }
    }
}

/// Suspicious IP row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SuspiciousIpRow {
    pub ip_address: String,
    pub reason: String,
    pub first_seen: DateTime<Utc>,
}

impl From<SuspiciousIpRow> for SuspiciousIp {
    fn from(row: SuspiciousIpRow) -> Self {
        Self {
            address: row.ip_address,
            reason: row.reason,
            first_seen: Some(row.first_seen),
        }
    }
}

/// Database queries
pub mod queries {
    use super::*;

    /// Check whether an address is on the block list
    pub async fn is_blocked(pool: &PgPool, ip: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM blocked_ips WHERE ip_address = $1)")
            .bind(ip)
            .fetch_one(pool)
            .await
    }

    /// Block an address; returns false if it was already blocked
    pub async fn insert_blocked_ip(pool: &PgPool, ip: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO blocked_ips (ip_address) VALUES ($1) ON CONFLICT (ip_address) DO NOTHING",
        )
        .bind(ip)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Unblock an address; returns false if it was not blocked
    pub async fn delete_blocked_ip(pool: &PgPool, ip: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM blocked_ips WHERE ip_address = $1")
            .bind(ip)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List blocked addresses, newest first
    pub async fn list_blocked_ips(pool: &PgPool) -> Result<Vec<BlockedIpRow>, sqlx::Error> {
        sqlx::query_as::<_, BlockedIpRow>(
            "SELECT ip_address, created_at FROM blocked_ips ORDER BY created_at DESC",
        )
        .fetch_all(pool)
        .await
    }

    /// Append one audit entry
    pub async fn insert_request_log(pool: &PgPool, entry: &AuditEntry) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO request_logs (ip_address, path, timestamp, country, city)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.address.as_deref())
        .bind(&entry.path)
        .bind(entry.timestamp)
        .bind(entry.country.as_deref())
        .bind(entry.city.as_deref())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Request counts per address since the cutoff
    pub async fn request_counts_since(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AddressCount>, sqlx::Error> {
        sqlx::query_as::<_, AddressCount>(
            r#"
            SELECT ip_address AS address, COUNT(*) AS count
            FROM request_logs
            WHERE timestamp >= $1 AND ip_address IS NOT NULL
            GROUP BY ip_address
            "#,
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await
    }

    /// Distinct (address, path) pairs since the cutoff
    pub async fn request_paths_since(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AddressPath>, sqlx::Error> {
        sqlx::query_as::<_, AddressPath>(
            r#"
            SELECT DISTINCT ip_address AS address, path
            FROM request_logs
            WHERE timestamp >= $1 AND ip_address IS NOT NULL
            "#,
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await
    }

    /// Insert a suspicious IP flag unless the (address, reason) pair exists
    pub async fn insert_suspicious_ip(
        pool: &PgPool,
        ip: &str,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO suspicious_ips (ip_address, reason)
            VALUES ($1, $2)
            ON CONFLICT (ip_address, reason) DO NOTHING
            "#,
        )
        .bind(ip)
        .bind(reason)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Most recent suspicious IP flags
    pub async fn recent_suspicious_ips(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<SuspiciousIpRow>, sqlx::Error> {
        sqlx::query_as::<_, SuspiciousIpRow>(
            "SELECT ip_address, reason, first_seen FROM suspicious_ips ORDER BY first_seen DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}

/// Block list, audit log and flag store backed by Postgres
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlockList for PgStore {
    async fn contains(&self, address: &str) -> Result<bool, StoreError> {
        Ok(queries::is_blocked(&self.pool, address).await?)
    }

    async fn insert(&self, address: &str) -> Result<bool, StoreError> {
        Ok(queries::insert_blocked_ip(&self.pool, address).await?)
    }

    async fn remove(&self, address: &str) -> Result<bool, StoreError> {
        Ok(queries::delete_blocked_ip(&self.pool, address).await?)
    }

    async fn list(&self) -> Result<Vec<BlockedIp>, StoreError> {
        let rows = queries::list_blocked_ips(&self.pool).await?;
        Ok(rows.into_iter().map(BlockedIp::from).collect())
    }
}

#[async_trait]
impl AuditLog for PgStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        Ok(queries::insert_request_log(&self.pool, entry).await?)
    }

    async fn counts_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<AddressCount>, StoreError> {
        Ok(queries::request_counts_since(&self.pool, cutoff).await?)
    }

    async fn paths_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<AddressPath>, StoreError> {
        Ok(queries::request_paths_since(&self.pool, cutoff).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FlagStore for PgStore {
    async fn flag(&self, address: &str, reason: &str) -> Result<bool, StoreError> {
        Ok(queries::insert_suspicious_ip(&self.pool, address, reason).await?)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<SuspiciousIp>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = queries::recent_suspicious_ips(&self.pool, limit).await?;
        Ok(rows.into_iter().map(SuspiciousIp::from).collect())
    }
}
