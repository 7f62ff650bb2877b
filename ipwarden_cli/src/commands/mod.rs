pub mod blocklist;
pub mod scan;

use anyhow::Result;

/// Turn a non-success response into an error carrying the server's detail
pub(crate) async fn check_status(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ipwarden_common::ErrorBody>(&text)
        .map(|body| body.detail)
        .unwrap_or(text);
    anyhow::bail!("Failed to {}: {} - {}", action, status, detail);
}
