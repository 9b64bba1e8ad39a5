use std::fmt::{self, Write};

use sha2::{Digest, Sha256};

use crate::asset::AssetId;

/// The content-addressed name of an asset in the [`DiskCache`](super::DiskCache).
///
/// The key is the SHA-256 hash of the asset id. Ids are remote path fragments and may contain
/// anything, so they are never used as file names directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    hash: [u8; 32],
}

impl CacheKey {
    pub fn for_asset(id: &AssetId) -> Self {
        let hash = Sha256::digest(id.as_str().as_bytes());
        Self { hash: hash.into() }
    }

    /// Returns the file name for this key with the given extension.
    ///
    /// The name is the hex-formatted hash, for example `4f2b...c1.jpeg`.
    pub fn file_name(&self, extension: &str) -> String {
        let mut name = String::with_capacity(self.hash.len() * 2 + 1 + extension.len());
        for b in &self.hash {
            // Writing to a `String` is infallible.
            let _ = write!(name, "{b:02x}");
        }
        name.push('.');
        name.push_str(extension);
        name
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.hash {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}
