//! Block list commands (block, unblock, blocked)

use crate::commands::check_status;
use crate::config::Config;
use anyhow::{Context, Result};
use ipwarden_common::{canonical_ip, BlockIpRequest, BlockIpResponse, BlockStatus, BlockedIp, UnblockIpResponse};
use reqwest::StatusCode;

/// Block an address
pub async fn block(config: &Config, raw: &str) -> Result<()> {
    let response = request_block(config, raw).await?;
    println!("{}", block_message(&response));
    Ok(())
}

/// Validate locally, then ask the server to block the canonical address
pub async fn request_block(config: &Config, raw: &str) -> Result<BlockIpResponse> {
    let ip = canonical_ip(raw).context("Invalid IP address")?;
    let token = config.require_token()?;

    let response = reqwest::Client::new()
        .post(config.admin_url("/blocked"))
        .bearer_auth(token)
        .json(&BlockIpRequest { ip: ip.to_string() })
        .send()
        .await
        .context("Failed to reach ipwarden server")?;

    let response = check_status(response, "block IP").await?;
    Ok(response.json().await?)
}

pub fn block_message(response: &BlockIpResponse) -> String {
    match response.status {
        BlockStatus::Added => format!("Blocked IP added: {}", response.ip),
        BlockStatus::AlreadyBlocked => format!("IP already blocked: {}", response.ip),
    }
}

/// Remove an address from the block list
pub async fn unblock(config: &Config, raw: &str) -> Result<()> {
    let response = request_unblock(config, raw).await?;
    if response.removed {
        println!("Blocked IP removed: {}", response.ip);
    } else {
        println!("IP was not blocked: {}", response.ip);
    }
    Ok(())
}

pub async fn request_unblock(config: &Config, raw: &str) -> Result<UnblockIpResponse> {
    let ip = canonical_ip(raw).context("Invalid IP address")?;
    let token = config.require_token()?;

    let response = reqwest::Client::new()
        .delete(config.admin_url(&format!("/blocked/{}", ip)))
        .bearer_auth(token)
        .send()
        .await
        .context("Failed to reach ipwarden server")?;

    // 404 carries the same body with `removed: false`
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(UnblockIpResponse {
            ip: ip.to_string(),
            removed: false,
        });
    }

    let response = check_status(response, "unblock IP").await?;
    Ok(response.json().await?)
}

/// List blocked addresses
pub async fn list(config: &Config) -> Result<()> {
    let token = config.require_token()?;

    let response = reqwest::Client::new()
        .get(config.admin_url("/blocked"))
        .bearer_auth(token)
        .send()
        .await
        .context("Failed to reach ipwarden server")?;

    let response = check_status(response, "list blocked IPs").await?;
    let blocked: Vec<BlockedIp> = response.json().await?;

    if blocked.is_empty() {
        println!("No blocked IPs.");
        return Ok(());
    }

    println!("{:<40} {}", "IP", "BLOCKED AT");
    for entry in &blocked {
        let created = entry
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<40} {}", entry.address, created);
    }
    println!();
    println!("{} blocked", blocked.len());

    Ok(())
}
