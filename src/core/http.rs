//! HTTP client utilities.
//!
//! One shared client for link resolution and blob downloads.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, Response};

use crate::error::{CacheError, Result};

/// Default timeout for HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(format!("trackcache/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| CacheError::Network(e.to_string()))
}

/// Get or create a default HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn default_client() -> Result<Client> {
    build_client(DEFAULT_TIMEOUT)
}

/// Send a GET and reject non-success statuses.
///
/// # Errors
///
/// Returns [`CacheError::Timeout`], [`CacheError::Network`] or
/// [`CacheError::HttpStatus`].
pub async fn get_checked(client: &Client, url: &str, timeout: Duration) -> Result<Response> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| CacheError::from_reqwest(&e, timeout.as_secs()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CacheError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    Ok(response)
}

/// Fetch JSON from a URL.
///
/// # Errors
///
/// Returns error on network failure, non-success status or JSON parse failure.
pub async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<T> {
    get_checked(client, url, timeout)
        .await?
        .json()
        .await
        .map_err(|e| CacheError::ParseResponse(e.to_string()))
}
