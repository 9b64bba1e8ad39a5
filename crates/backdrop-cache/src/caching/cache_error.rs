use thiserror::Error;

use crate::asset::Asset;

/// An error that happens while preparing an asset.
///
/// One failed computation is delivered to every observer of the same
/// [`InFlightHandle`](crate::provider::InFlightHandle), so errors are cheap to clone and carry
/// their details as strings. Errors are never cached; the next
/// [`prepare`](crate::provider::AssetProvider::prepare) starts over.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    /// No remote URL could be derived from the asset id.
    #[error("invalid asset id: {0}")]
    InvalidAssetId(String),
    /// The download failed on the network level, including timeouts.
    #[error("download failed: {0}")]
    Transport(String),
    /// The remote source answered with a non-success status code.
    #[error("unexpected response status: {0}")]
    InvalidResponse(u16),
    /// The downloaded bytes are not a decodable image, either in the header or in the body.
    #[error("invalid image: {0}")]
    InvalidImage(String),
    /// Resizing or re-encoding a decoded source image failed.
    #[error("downsampling failed: {0}")]
    DownsampleFailed(String),
    /// Reading or writing the disk cache failed.
    #[error("storage error: {0}")]
    Storage(String),
    /// The asset was saved, but could not be read back from the disk cache.
    #[error("asset missing after write")]
    MissingAfterWrite,
    /// The observer withdrew before the computation finished.
    ///
    /// This is only ever delivered to the observer that cancelled. Everybody else still receives
    /// the outcome of the shared computation.
    #[error("cancelled")]
    Cancelled,
    /// An unexpected error in the cache itself, such as a computation task that went away.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for AssetError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        let dynerr: &dyn std::error::Error = &err;
        tracing::error!(error = dynerr, "Disk cache I/O failed");
        Self::Storage(err.to_string())
    }
}

impl AssetError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }

    /// A short, stable name for the error kind, used as a metrics tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAssetId(_) => "invalid_asset_id",
            Self::Transport(_) => "transport",
            Self::InvalidResponse(_) => "invalid_response",
            Self::InvalidImage(_) => "invalid_image",
            Self::DownsampleFailed(_) => "downsample_failed",
            Self::Storage(_) => "storage",
            Self::MissingAfterWrite => "missing_after_write",
            Self::Cancelled => "cancelled",
            Self::InternalError => "internal",
        }
    }
}

/// The outcome of preparing an asset: either `Ok(T)` or the reason why it is not available.
pub type AssetEntry<T = Asset> = Result<T, AssetError>;
