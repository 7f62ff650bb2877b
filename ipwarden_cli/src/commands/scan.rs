//! Anomaly commands (flags, scan)

use crate::commands::check_status;
use crate::config::Config;
use anyhow::{Context, Result};
use ipwarden_common::{ScanReport, SuspiciousIp};

/// Show the most recent suspicious IP flags
pub async fn flags(config: &Config, limit: usize) -> Result<()> {
    let flags = fetch_flags(config, limit).await?;

    if flags.is_empty() {
        println!("No suspicious IPs flagged.");
        return Ok(());
    }

    println!("{:<40} {:<24} {}", "IP", "FIRST SEEN", "REASON");
    for flag in &flags {
        let first_seen = flag
            .first_seen
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<40} {:<24} {}", flag.address, first_seen, flag.reason);
    }

    Ok(())
}

pub async fn fetch_flags(config: &Config, limit: usize) -> Result<Vec<SuspiciousIp>> {
    let token = config.require_token()?;

    let response = reqwest::Client::new()
        .get(config.admin_url("/flags"))
        .query(&[("limit", limit)])
        .bearer_auth(token)
        .send()
        .await
        .context("Failed to reach ipwarden server")?;

    let response = check_status(response, "fetch flags").await?;
    Ok(response.json().await?)
}

/// Trigger a scan now and print its report
pub async fn scan(config: &Config) -> Result<()> {
    let report = run_scan(config).await?;
    println!("{}", report_summary(&report));
    Ok(())
}

pub async fn run_scan(config: &Config) -> Result<ScanReport> {
    let token = config.require_token()?;

    let response = reqwest::Client::new()
        .post(config.admin_url("/scan"))
        .bearer_auth(token)
        .send()
        .await
        .context("Failed to reach ipwarden server")?;

    let response = check_status(response, "run scan").await?;
    Ok(response.json().await?)
}

pub fn report_summary(report: &ScanReport) -> String {
    format!(
        "Scan complete ({}s window): {} high-volume, {} sensitive-path; {} new flags, {} already flagged",
        report.window_secs, report.high_volume, report.sensitive, report.created, report.existing
    )
}
