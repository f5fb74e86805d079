//! Image I/O and codec service
//!
//! Converts between [`PixelBuffer`] and encoded bytes or files, and resizes
//! buffers for providers with input-size limits.

use crate::{
    config::ImageEncoding,
    error::{Result, RetouchError},
    types::PixelBuffer,
};
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;

/// Service for encoding, decoding and resizing pixel buffers
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image file into an RGBA8 buffer
    ///
    /// # Errors
    /// - File does not exist or cannot be read
    /// - Content cannot be decoded as PNG or JPEG
    ///
    /// # Examples
    /// ```rust,no_run
    /// use retouch::services::ImageIOService;
    ///
    /// let pixels = ImageIOService::load_pixels("input.png")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load_pixels<P: AsRef<Path>>(path: P) -> Result<PixelBuffer> {
        let path_ref = path.as_ref();
        let data = std::fs::read(path_ref)?;
        log::debug!("Read {} bytes from {}", data.len(), path_ref.display());
        Self::decode(&data)
    }

    /// Save a buffer, choosing the format from the file extension
    ///
    /// # Errors
    /// - Unsupported extension
    /// - Parent directory cannot be created or the file cannot be written
    pub fn save_pixels<P: AsRef<Path>>(pixels: &PixelBuffer, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let encoding = match path_ref
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("png") | None => ImageEncoding::Png,
            Some("jpg" | "jpeg") => ImageEncoding::Jpeg,
            Some(other) => {
                return Err(RetouchError::invalid_config(format!(
                    "unsupported output extension '{}' (expected png, jpg or jpeg)",
                    other
                )))
            },
        };

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let bytes = Self::encode(pixels, encoding)?;
        std::fs::write(path_ref, bytes)?;
        log::debug!("Saved {}x{} image to {}", pixels.width(), pixels.height(), path_ref.display());
        Ok(())
    }

    /// Encode a buffer for upload
    ///
    /// JPEG has no alpha channel, so it is dropped for that encoding.
    ///
    /// # Errors
    /// Encoder failures.
    pub fn encode(pixels: &PixelBuffer, encoding: ImageEncoding) -> Result<Vec<u8>> {
        let image = DynamicImage::ImageRgba8(pixels.to_rgba_image()?);
        let mut cursor = Cursor::new(Vec::new());
        match encoding {
            ImageEncoding::Png => image.write_to(&mut cursor, ImageFormat::Png)?,
            ImageEncoding::Jpeg => {
                DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut cursor, ImageFormat::Jpeg)?;
            },
        }
        Ok(cursor.into_inner())
    }

    /// Decode PNG or JPEG bytes into an RGBA8 buffer
    ///
    /// # Errors
    /// Bytes that are not a supported image.
    pub fn decode(data: &[u8]) -> Result<PixelBuffer> {
        let image = image::load_from_memory(data)?;
        Ok(PixelBuffer::from_rgba_image(image.to_rgba8()))
    }

    /// Resample to exactly `width` x `height` with a Lanczos3 filter
    ///
    /// # Errors
    /// Only fails if the buffer's length invariant was broken.
    pub fn resize(pixels: &PixelBuffer, width: u32, height: u32) -> Result<PixelBuffer> {
        if pixels.dimensions() == (width, height) {
            return Ok(pixels.clone());
        }
        let image = pixels.to_rgba_image()?;
        let resized = image::imageops::resize(&image, width, height, FilterType::Lanczos3);
        Ok(PixelBuffer::from_rgba_image(resized))
    }

    /// Shrink so that the longest side is at most `max_dimension`.
    ///
    /// Returns the (possibly unchanged) buffer and the factor that maps
    /// original coordinates onto it (`1.0` when no resize happened).
    ///
    /// # Errors
    /// Only fails if the buffer's length invariant was broken.
    pub fn downscale_to_fit(pixels: &PixelBuffer, max_dimension: u32) -> Result<(PixelBuffer, f64)> {
        let longest = pixels.width().max(pixels.height());
        if max_dimension == 0 || longest <= max_dimension {
            return Ok((pixels.clone(), 1.0));
        }
        let scale = f64::from(max_dimension) / f64::from(longest);
        let width = ((f64::from(pixels.width()) * scale).round() as u32).max(1);
        let height = ((f64::from(pixels.height()) * scale).round() as u32).max(1);
        log::debug!(
            "Downscaling {}x{} to {}x{} for provider input",
            pixels.width(),
            pixels.height(),
            width,
            height
        );
        Ok((Self::resize(pixels, width, height)?, scale))
    }
}
