//! Public IPv4 lookup, used as the localtunnel password note.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const IPIFY_URL: &str = "https://api64.ipify.org?format=json&ipv4=true";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PublicIpError {
    #[error("Error getting public ipv4 address: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Error getting public ipv4 address: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct IpifyResponse {
    ip: String,
}

/// Extract the address from an ipify JSON body.
pub fn parse_ipify(body: &str) -> Result<String, PublicIpError> {
    let response: IpifyResponse = serde_json::from_str(body)?;
    Ok(response.ip)
}

pub async fn fetch_public_ip(client: &reqwest::Client) -> Result<String, PublicIpError> {
    let body = client
        .get(IPIFY_URL)
        .timeout(LOOKUP_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    parse_ipify(&body)
}

/// The address, or `None` after logging why it could not be found.
pub async fn lookup(client: &reqwest::Client) -> Option<String> {
    match fetch_public_ip(client).await {
        Ok(ip) => {
            tracing::debug!("Public IPv4 address: {}", ip);
            Some(ip)
        }
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    }
}
