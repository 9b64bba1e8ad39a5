use std::fmt;
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageFormat, RgbaImage};

use crate::caching::AssetError;

/// The on-disk image format of the cache.
///
/// A codec decides how downsampled assets are encoded before they are persisted, and how they are
/// decoded again when read back.
pub trait Codec: fmt::Debug + Send + Sync + 'static {
    /// The format persisted files are in.
    fn format(&self) -> ImageFormat;

    /// The file extension used for persisted files, without the leading dot.
    fn extension(&self) -> &'static str;

    /// Encodes `image` with the given quality (`1..=100`).
    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, AssetError>;

    /// Decodes a persisted file.
    fn decode(&self, data: &[u8]) -> Result<RgbaImage, AssetError>;
}

/// Persists assets as baseline JPEG files.
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegCodec;

impl Codec for JpegCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Jpeg
    }

    fn extension(&self) -> &'static str {
        "jpeg"
    }

    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, AssetError> {
        // JPEG has no alpha channel.
        let rgb = image.to_rgb8();

        let mut out = Cursor::new(Vec::new());
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        encoder
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8.into())
            .map_err(|e| AssetError::DownsampleFailed(format!("failed to encode JPEG: {e}")))?;

        Ok(out.into_inner())
    }

    fn decode(&self, data: &[u8]) -> Result<RgbaImage, AssetError> {
        let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
            .map_err(|e| AssetError::InvalidImage(e.to_string()))?;
        Ok(image.to_rgba8())
    }
}
