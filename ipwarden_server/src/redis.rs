//! Redis connection and the shared geo cache

use crate::cache::{cache_key, GeoCache};
use crate::store::StoreError;
use async_trait::async_trait;
use fred::clients::Client;
use fred::interfaces::*;
use fred::types::{config::Config as RedisConfig, Expiration};
use ipwarden_common::GeoLocation;
use std::time::Duration;

/// Initialize Redis client
pub async fn init_client(redis_url: &str) -> anyhow::Result<Client> {
    let config = RedisConfig::from_url(redis_url)?;
    let client = Client::new(config, None, None, None);
    client.init().await?;
    Ok(client)
}

/// Geo cache stored as JSON strings under `geo:{address}` with a Redis TTL
pub struct RedisGeoCache {
    client: Client,
}

impl RedisGeoCache {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GeoCache for RedisGeoCache {
    async fn get(&self, address: &str) -> Result<Option<GeoLocation>, StoreError> {
        let value: Option<String> = self.client.get(cache_key(address)).await?;

        match value {
            Some(json) => Ok(Some(GeoLocation::from_json(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, address: &str, location: &GeoLocation, ttl: Duration) -> Result<(), StoreError> {
        let value = location.to_json()?;
        let secs = ttl.as_secs().max(1) as i64;

        self.client
            .set::<(), _, _>(cache_key(address), value, Some(Expiration::EX(secs)), None, false)
            .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client.ping::<()>(None).await?;
        Ok(())
    }
}
