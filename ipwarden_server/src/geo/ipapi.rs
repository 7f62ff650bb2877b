//! ipapi.co-style geolocation provider (`GET {base}/{ip}/json/`)

use super::{GeoError, GeoProvider};
use async_trait::async_trait;
use ipwarden_common::GeoLocation;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

/// Provider response body. Only `country` and `city` are used.
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    country: Option<String>,

    #[serde(default)]
    city: Option<String>,

    /// Set by the provider on quota or lookup errors
    #[serde(default)]
    error: bool,

    #[serde(default)]
    reason: Option<String>,
}

/// HTTP geolocation provider
pub struct IpApiProvider {
    base_url: String,
    client: Client,
}

impl IpApiProvider {
    /// Create a provider for `base_url` with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GeoError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ipwarden/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn lookup_url(&self, ip: &IpAddr) -> String {
        format!("{}/{}/json/", self.base_url, ip)
    }
}

#[async_trait]
impl GeoProvider for IpApiProvider {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError> {
        let url = self.lookup_url(&ip);
        debug!(ip = %ip, "Querying geo provider");

        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(GeoError::Status(status.as_u16()));
        }

        let body: IpApiResponse = response
            .json()
            .await
            .map_err(|e| GeoError::InvalidResponse(e.to_string()))?;

        if body.error {
            return Err(GeoError::InvalidResponse(
                body.reason.unwrap_or_else(|| "provider reported an error".to_string()),
            ));
        }

        Ok(GeoLocation::new(body.country.as_deref(), body.city.as_deref()))
    }

    fn name(&self) -> &str {
        "ipapi"
    }
}
