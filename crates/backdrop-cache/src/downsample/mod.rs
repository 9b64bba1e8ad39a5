//! Reduces downloaded source images to a bounded size before they are persisted.
//!
//! Backdrops are served at up to 4K resolution, but rendered much smaller. Downsampling happens in
//! two steps:
//!
//!  1. The source is decoded with a power-of-two reduction chosen from its header, see
//!     [`subsample_factor`]. For JPEG sources the decoder performs this reduction itself, so the
//!     full resolution image never exists in memory.
//!  2. The decoded image is resized so that its longest side is at most `max_dimension`, and then
//!     re-encoded by the configured [`Codec`].

use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use image::imageops::FilterType;

use crate::caching::AssetError;

mod codec;
mod source;

pub use codec::{Codec, JpegCodec};
pub use source::{MAX_JPEG_SUBSAMPLE_FACTOR, SourceImage};

/// The default bound for the longest side of a persisted asset, in pixels.
pub const DEFAULT_MAX_DIMENSION: u32 = 800;

/// The default encoding quality of persisted assets.
pub const DEFAULT_QUALITY: u8 = 70;

/// Computes the power-of-two reduction applied while decoding.
///
/// This is `floor(log2(max(width, height) / max_dimension))`, and `0` for images that already fit.
/// Decoding at `1 / 2^factor` never yields an image smaller than `max_dimension` on its longest
/// side, so the final resize only ever shrinks.
pub fn subsample_factor(max_dimension: u32, width: u32, height: u32) -> u32 {
    let longest = width.max(height);
    let max_dimension = max_dimension.max(1);
    if longest <= max_dimension {
        return 0;
    }

    let ratio = f64::from(longest) / f64::from(max_dimension);
    ratio.log2().floor().max(0.0) as u32
}

/// Downsamples source images into the format persisted by the disk cache.
#[derive(Debug, Clone)]
pub struct Downsampler {
    codec: Arc<dyn Codec>,
    max_dimension: u32,
    quality: u8,
}

impl Downsampler {
    pub fn new(codec: Arc<dyn Codec>, max_dimension: u32, quality: u8) -> Self {
        Self {
            codec,
            max_dimension: max_dimension.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn codec(&self) -> &dyn Codec {
        &*self.codec
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Decodes, shrinks and re-encodes `source`.
    ///
    /// The result's longest side is at most `max_dimension`. Images are never upscaled.
    pub fn downsample(&self, source: &SourceImage<'_>) -> Result<Vec<u8>, AssetError> {
        let start = Instant::now();

        let factor = subsample_factor(self.max_dimension, source.width(), source.height());
        let decoded = source.decode_subsampled(factor)?;
        let bounded = self.fit(decoded);
        let encoded = self.codec.encode(&bounded, self.quality)?;

        tracing::debug!(
            "Downsampled {}x{} {:?} to {}x{} (subsample factor {})",
            source.width(),
            source.height(),
            source.format(),
            bounded.width(),
            bounded.height(),
            factor,
        );
        metric!(timer("assets.downsample.duration") = start.elapsed());

        Ok(encoded)
    }

    /// Shrinks `image` so that it fits into a `max_dimension` square, keeping its aspect ratio.
    fn fit(&self, image: DynamicImage) -> DynamicImage {
        if image.width().max(image.height()) <= self.max_dimension {
            return image;
        }
        image.resize(self.max_dimension, self.max_dimension, FilterType::Triangle)
    }
}
