//! Link resolution collaborator.
//!
//! Turns a track id into short-lived download URLs for its audio and art.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::core::http::fetch_json;
use crate::core::models::TrackId;
use crate::error::{CacheError, Result};

/// Download URLs for one track. Either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackLinks {
    #[serde(default)]
    pub audio_link: Option<String>,
    #[serde(default)]
    pub art_link: Option<String>,
}

/// Source of download links.
pub trait LinkResolver: Send + Sync {
    fn fetch_links<'a>(
        &'a self,
        id: &'a TrackId,
        want_audio: bool,
        want_art: bool,
    ) -> BoxFuture<'a, Result<TrackLinks>>;
}

/// Link resolver backed by the library service's HTTP API.
///
/// `GET {endpoint}/tracks/{id}/links?audio=<bool>&art=<bool>`
#[derive(Debug, Clone)]
pub struct HttpLinkResolver {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpLinkResolver {
    /// # Errors
    /// Returns [`CacheError::ConfigInvalid`] if `endpoint` is not a base URL.
    pub fn new(client: Client, endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| CacheError::ConfigInvalid {
                key: "network.link_endpoint".to_string(),
                value: endpoint.to_string(),
                message: "not a valid base URL".to_string(),
            })?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// Request URL for a track. Path segments are percent-encoded.
    #[must_use]
    pub fn links_url(&self, id: &TrackId, want_audio: bool, want_art: bool) -> String {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["tracks", id.as_str(), "links"]);
        }
        url.query_pairs_mut()
            .append_pair("audio", bool_param(want_audio))
            .append_pair("art", bool_param(want_art));
        url.into()
    }
}

const fn bool_param(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

impl LinkResolver for HttpLinkResolver {
    fn fetch_links<'a>(
        &'a self,
        id: &'a TrackId,
        want_audio: bool,
        want_art: bool,
    ) -> BoxFuture<'a, Result<TrackLinks>> {
        Box::pin(async move {
            let url = self.links_url(id, want_audio, want_art);
            tracing::debug!(track_id = %id, want_audio, want_art, "Resolving download links");
            fetch_json(&self.client, &url, self.timeout).await
        })
    }
}
