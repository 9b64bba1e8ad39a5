//! Asset identifiers and decoded assets.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use image::RgbaImage;

/// Identifies a single remote image within the cache namespace.
///
/// Ids are opaque to the cache. They are usually a path fragment of the remote image URL, such as
/// `"kqjL17yufvn9OVLyXYpvtyrFfak.jpg"`. Cloning is cheap.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(Arc<str>);

impl AssetId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AssetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for AssetId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AssetId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// A decoded image for a given [`AssetId`].
///
/// An asset is either *resolved*, carrying the downsampled pixels read back from the disk cache,
/// or a *placeholder* with an empty image. Placeholders are handed out when nothing is cached yet
/// and are never persisted or kept in memory.
///
/// The pixel buffer is shared, so clones are cheap.
#[derive(Clone, PartialEq)]
pub struct Asset {
    id: AssetId,
    is_placeholder: bool,
    image: Arc<RgbaImage>,
}

impl Asset {
    /// Creates a resolved asset from decoded pixels.
    pub fn resolved(id: AssetId, image: RgbaImage) -> Self {
        Self {
            id,
            is_placeholder: false,
            image: Arc::new(image),
        }
    }

    /// Creates a placeholder for an asset that is not available locally.
    pub fn placeholder(id: AssetId) -> Self {
        Self {
            id,
            is_placeholder: true,
            image: Arc::new(RgbaImage::new(0, 0)),
        }
    }

    pub fn id(&self) -> &AssetId {
        &self.id
    }

    pub fn is_placeholder(&self) -> bool {
        self.is_placeholder
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// The size of the decoded pixel buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.image.as_raw().len()
    }
}

// Printing the pixel buffer is never useful.
impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Asset")
            .field("id", &self.id)
            .field("is_placeholder", &self.is_placeholder)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}
