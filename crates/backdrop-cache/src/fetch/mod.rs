//! Downloading source images for assets.

use bytes::Bytes;
use futures::future::BoxFuture;
use url::Url;

use crate::asset::AssetId;
use crate::caching::AssetError;

mod http;

pub use http::{DEFAULT_BASE_URL, HttpFetcher};

/// The user agent sent with every download.
pub const USER_AGENT: &str = concat!("backdrop-cache/", env!("CARGO_PKG_VERSION"));

/// Resolves asset ids to remote URLs and downloads their bytes.
///
/// The [`AssetProvider`](crate::provider::AssetProvider) calls this at most once per prepared
/// asset. Implementations do not validate that the bytes are an image.
pub trait Fetcher: std::fmt::Debug + Send + Sync + 'static {
    /// Derives the remote URL of an asset.
    ///
    /// Fails with [`AssetError::InvalidAssetId`] if no URL can be derived.
    fn resolve_url(&self, id: &AssetId) -> Result<Url, AssetError>;

    /// Downloads the full body at `url`.
    ///
    /// Fails with [`AssetError::Transport`] if the request could not be completed and with
    /// [`AssetError::InvalidResponse`] for non-success status codes.
    fn download<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<Bytes, AssetError>>;
}
