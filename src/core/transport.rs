//! Blob transport collaborator.

use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use tokio::io::AsyncWriteExt;

use crate::core::http::get_checked;
use crate::error::{CacheError, Result};

/// Downloads a URL into a local file.
pub trait BlobTransport: Send + Sync {
    /// Write the body at `url` into `dest`, returning the byte count.
    fn download_to<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<u64>>;
}

/// Streaming HTTP download.
#[derive(Debug, Clone)]
pub struct HttpBlobTransport {
    client: Client,
    timeout: Duration,
}

impl HttpBlobTransport {
    #[must_use]
    pub const fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl BlobTransport for HttpBlobTransport {
    fn download_to<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let mut response = get_checked(&self.client, url, self.timeout).await?;
            let mut file = tokio::fs::File::create(dest).await?;
            let mut written: u64 = 0;

            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| CacheError::from_reqwest(&e, self.timeout.as_secs()))?
            {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }

            file.flush().await?;
            file.sync_all().await?;
            tracing::trace!(bytes = written, path = %dest.display(), "Download complete");
            Ok(written)
        })
    }
}
