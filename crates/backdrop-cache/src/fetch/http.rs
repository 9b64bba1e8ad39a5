//! Support to download from HTTP image hosts.

use std::time::Instant;

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::{Client, header};
use url::Url;

use crate::asset::AssetId;
use crate::caching::AssetError;
use crate::config::Config;
use crate::utils::http::{DownloadTimeouts, create_client};

use super::{Fetcher, USER_AGENT};

/// The image host serving original size backdrops.
pub const DEFAULT_BASE_URL: &str = "https://image.tmdb.org/t/p/original/";

/// Fetcher implementation that joins asset ids onto a base URL.
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
}

impl HttpFetcher {
    pub fn new(client: Client, mut base_url: Url) -> Self {
        // Without a trailing slash, `join` would replace the last path segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { client, base_url }
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let client = create_client(&DownloadTimeouts::from_config(config))?;
        Ok(Self::new(client, config.source.base_url.clone()))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl Fetcher for HttpFetcher {
    fn resolve_url(&self, id: &AssetId) -> Result<Url, AssetError> {
        let path = id.as_str().trim().trim_start_matches('/');
        if path.is_empty() {
            return Err(AssetError::InvalidAssetId(id.to_string()));
        }

        let url = self
            .base_url
            .join(path)
            .map_err(|e| AssetError::InvalidAssetId(format!("{id}: {e}")))?;

        // Ids are path fragments below the base URL and must not escape it.
        if !url.as_str().starts_with(self.base_url.as_str()) || url == self.base_url {
            return Err(AssetError::InvalidAssetId(id.to_string()));
        }

        Ok(url)
    }

    fn download<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<Bytes, AssetError>> {
        Box::pin(async move {
            let start = Instant::now();
            tracing::debug!("Fetching asset from `{}`", url);

            let response = self
                .client
                .get(url.clone())
                .header(header::USER_AGENT, USER_AGENT)
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            metric!(counter("assets.download") += 1, "status" => status.as_str());
            if !status.is_success() {
                tracing::debug!("Unexpected status code from `{}`: {}", url, status);
                return Err(AssetError::InvalidResponse(status.as_u16()));
            }

            let bytes = response.bytes().await.map_err(transport_error)?;

            metric!(timer("assets.download.duration") = start.elapsed());
            metric!(distribution("assets.download.size") = bytes.len() as u64);
            tracing::trace!("Downloaded {} bytes from `{}`", bytes.len(), url);

            Ok(bytes)
        })
    }
}

fn transport_error(err: reqwest::Error) -> AssetError {
    tracing::debug!(
        error = &err as &dyn std::error::Error,
        "failed to download asset"
    );
    if err.is_timeout() {
        AssetError::Transport(format!("timed out: {err}"))
    } else {
        AssetError::Transport(err.to_string())
    }
}
