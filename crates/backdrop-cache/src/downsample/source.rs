use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, ImageReader, RgbImage};
use jpeg_decoder::PixelFormat;

use crate::caching::AssetError;

/// The largest reduction JPEG decoders can apply while decoding, as a power of two (1/8).
pub const MAX_JPEG_SUBSAMPLE_FACTOR: u32 = 3;

/// An encoded source image whose header has been read, but whose pixels have not been decoded.
#[derive(Debug, Clone, Copy)]
pub struct SourceImage<'a> {
    data: &'a [u8],
    format: ImageFormat,
    width: u32,
    height: u32,
}

impl<'a> SourceImage<'a> {
    /// Reads the format and dimensions of `data` from its header.
    ///
    /// Fails with [`AssetError::InvalidImage`] for data that is not a supported image.
    pub fn probe(data: &'a [u8]) -> Result<Self, AssetError> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| AssetError::InvalidImage(e.to_string()))?;
        let format = reader
            .format()
            .ok_or_else(|| AssetError::InvalidImage("unrecognized image format".into()))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| AssetError::InvalidImage(e.to_string()))?;

        if width == 0 || height == 0 {
            return Err(AssetError::InvalidImage(format!(
                "image has no pixels ({width}x{height})"
            )));
        }

        Ok(Self {
            data,
            format,
            width,
            height,
        })
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Decodes the image, shrunk by `2^factor` where the format supports it.
    ///
    /// JPEG images are scaled in the DCT domain, so the full resolution image is never
    /// materialized. Other formats are decoded at full resolution and left for the resize step.
    ///
    /// A body that does not decode fails with [`AssetError::InvalidImage`], even though the
    /// header was fine.
    pub fn decode_subsampled(&self, factor: u32) -> Result<DynamicImage, AssetError> {
        if self.format == ImageFormat::Jpeg && factor > 0 {
            if let Some(image) = self.decode_jpeg_scaled(factor)? {
                return Ok(image);
            }
        }

        image::load_from_memory_with_format(self.data, self.format)
            .map_err(|e| AssetError::InvalidImage(format!("failed to decode source: {e}")))
    }

    /// Decodes a JPEG at reduced size.
    ///
    /// Returns `None` for pixel formats that need the full decoder, such as CMYK.
    fn decode_jpeg_scaled(&self, factor: u32) -> Result<Option<DynamicImage>, AssetError> {
        let factor = factor.min(MAX_JPEG_SUBSAMPLE_FACTOR);
        let scale = 1 << factor;
        let requested_width = u16::try_from(self.width.div_ceil(scale)).unwrap_or(u16::MAX);
        let requested_height = u16::try_from(self.height.div_ceil(scale)).unwrap_or(u16::MAX);

        let mut decoder = jpeg_decoder::Decoder::new(self.data);
        decoder.read_info().map_err(decode_error)?;
        let (width, height) = decoder
            .scale(requested_width, requested_height)
            .map_err(decode_error)?;
        let pixels = decoder.decode().map_err(decode_error)?;
        let Some(info) = decoder.info() else {
            return Ok(None);
        };

        tracing::trace!(
            "Decoded {}x{} JPEG at {}x{} ({:?})",
            self.width,
            self.height,
            width,
            height,
            info.pixel_format
        );

        let (width, height) = (u32::from(width), u32::from(height));
        let image = match info.pixel_format {
            PixelFormat::RGB24 => {
                RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
            }
            PixelFormat::L8 => {
                GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
            }
            _ => return Ok(None),
        };

        image
            .map(Some)
            .ok_or_else(|| AssetError::InvalidImage("decoded buffer has wrong size".into()))
    }
}

fn decode_error(e: jpeg_decoder::Error) -> AssetError {
    AssetError::InvalidImage(format!("failed to decode source: {e}"))
}
