//! CLI connection settings

use anyhow::Result;

/// Where the admin API lives and how to authenticate against it
#[derive(Debug, Clone)]
pub struct Config {
    /// Server base URL (default: http://localhost:8080)
    pub server_url: String,

    /// Admin bearer token
    pub admin_token: Option<String>,
}

impl Config {
    pub fn new(server_url: &str, admin_token: Option<String>) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            admin_token: admin_token.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Get the admin token or fail with a helpful message
    pub fn require_token(&self) -> Result<&str> {
        self.admin_token.as_deref().ok_or_else(|| {
            anyhow::anyhow!("No admin token. Set IPWARDEN_ADMIN_TOKEN or pass --token.")
        })
    }

    /// Full URL of an admin API endpoint
    pub fn admin_url(&self, path: &str) -> String {
        format!("{}/_admin/api{}", self.server_url, path)
    }
}
