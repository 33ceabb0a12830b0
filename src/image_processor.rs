use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;

use crate::errors::{AppError, AppResult};
use crate::models::FileArtifact;
use crate::security::InputValidator;

/// Media types the compressor accepts as input.
pub const SUPPORTED_MIME_TYPES: [&str; 4] = ["image/jpg", "image/jpeg", "image/png", "image/webp"];

pub const OUTPUT_MIME_TYPE: &str = "image/webp";
pub const OUTPUT_EXTENSION: &str = "webp";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// Encoder quality in 0..=1
    pub quality: f32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            max_width: u32::MAX,
            max_height: u32::MAX,
            quality: 1.0,
        }
    }
}

#[async_trait]
pub trait ImageCompressor: Send + Sync {
    async fn compress(&self, file: &FileArtifact) -> AppResult<FileArtifact>;
}

/// Compressor backed by `compress_image` with fixed options.
#[derive(Debug, Clone, Default)]
pub struct WebpCompressor {
    options: CompressOptions,
}

impl WebpCompressor {
    pub fn new(options: CompressOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ImageCompressor for WebpCompressor {
    async fn compress(&self, file: &FileArtifact) -> AppResult<FileArtifact> {
        compress_image(file, self.options).await
    }
}

pub fn is_supported_mime_type(mime_type: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime_type)
}

/// Resize and re-encode an image to WebP. The input is left untouched.
pub async fn compress_image(file: &FileArtifact, options: CompressOptions) -> AppResult<FileArtifact> {
    if !is_supported_mime_type(&file.mime_type) {
        return Err(AppError::unsupported_format(&file.mime_type));
    }

    InputValidator::validate_compression_settings(
        options.max_width,
        options.max_height,
        options.quality,
    )?;

    let source = file.bytes.clone();
    let encoded = tokio::task::spawn_blocking(move || encode_webp(&source, options))
        .await
        .map_err(|e| AppError::Internal(format!("compression task failed: {}", e)))??;

    let compressed = FileArtifact {
        name: replace_extension(&file.name, OUTPUT_EXTENSION),
        mime_type: OUTPUT_MIME_TYPE.to_string(),
        bytes: encoded,
        last_modified: Utc::now(),
    };

    log::info!(
        "Compressed {} to {} ({} -> {} bytes, quality: {})",
        file.name,
        compressed.name,
        file.size(),
        compressed.size(),
        options.quality
    );

    Ok(compressed)
}

fn encode_webp(source: &[u8], options: CompressOptions) -> AppResult<Bytes> {
    let img = decode_image(source)?;

    let (width, height) =
        target_dimensions(img.width(), img.height(), options.max_width, options.max_height);

    let resized = if (width, height) == (img.width(), img.height()) {
        img
    } else {
        log::debug!(
            "Resizing from {}x{} to {}x{}",
            img.width(),
            img.height(),
            width,
            height
        );
        img.resize_exact(width, height, FilterType::Lanczos3)
    };

    // The WebP encoder only takes 8-bit RGB/RGBA rasters
    let raster = resized.to_rgba8();
    if raster.width() == 0 || raster.height() == 0 {
        return Err(AppError::codec("Failed to get raster surface"));
    }

    let encoder = webp::Encoder::from_rgba(raster.as_raw(), raster.width(), raster.height());
    let memory = encoder
        .encode_simple(false, options.quality * 100.0)
        .map_err(|e| AppError::Codec(format!("WebP encoding failed: {:?}", e)))?;

    if memory.is_empty() {
        return Err(AppError::codec("Failed to compress image"));
    }

    Ok(Bytes::copy_from_slice(&memory))
}

fn decode_image(source: &[u8]) -> AppResult<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(source)).with_guessed_format()?;
    reader
        .decode()
        .map_err(|e| AppError::Codec(format!("Failed to decode image: {}", e)))
}

/// Fit `width`x`height` within the maximum along its dominant side.
///
/// The scale factor is taken from the original dimensions so the aspect
/// ratio survives the clamp.
pub fn target_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width >= height {
        if width > max_width {
            return (max_width, scale(height, max_width, width));
        }
    } else if height > max_height {
        return (scale(width, max_height, height), max_height);
    }

    (width, height)
}

fn scale(value: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = (value as f64 * numerator as f64 / denominator as f64).round();
    (scaled as u32).max(1)
}

/// Swap the extension after the last `.`, or append one when there is none.
pub fn replace_extension(file_name: &str, extension: &str) -> String {
    match file_name.rfind('.') {
        Some(index) => format!("{}.{}", &file_name[..index], extension),
        None => format!("{}.{}", file_name, extension),
    }
}

/// Get image dimensions and file size without decoding pixels
pub fn get_image_info(file: &FileArtifact) -> AppResult<(u32, u32, u64)> {
    let reader = ImageReader::new(Cursor::new(&file.bytes[..])).with_guessed_format()?;
    let dimensions = reader.into_dimensions()?;

    Ok((dimensions.0, dimensions.1, file.size()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut output = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut output), format)
            .unwrap();
        output
    }

    #[test]
    fn test_target_dimensions_landscape() {
        assert_eq!(target_dimensions(2000, 1000, 1000, 1000), (1000, 500));
        assert_eq!(target_dimensions(800, 600, 1000, 1000), (800, 600));
    }

    #[test]
    fn test_target_dimensions_portrait() {
        assert_eq!(target_dimensions(1000, 3000, 1000, 1000), (333, 1000));
        assert_eq!(target_dimensions(600, 800, 1000, 1000), (600, 800));
    }

    #[test]
    fn test_target_dimensions_square_uses_width_rule() {
        assert_eq!(target_dimensions(1500, 1500, 1000, 2000), (1000, 1000));
    }

    #[test]
    fn test_target_dimensions_unbounded() {
        assert_eq!(target_dimensions(4000, 3000, u32::MAX, u32::MAX), (4000, 3000));
    }

    #[test]
    fn test_target_dimensions_never_zero() {
        assert_eq!(target_dimensions(10000, 1, 100, 100), (100, 1));
    }

    #[test]
    fn test_replace_extension() {
        assert_eq!(replace_extension("photo.jpeg", "webp"), "photo.webp");
        assert_eq!(replace_extension("archive.tar.png", "webp"), "archive.tar.webp");
        assert_eq!(replace_extension("photo", "webp"), "photo.webp");
        assert_eq!(replace_extension(".hidden", "webp"), ".webp");
    }

    #[test]
    fn test_supported_mime_types() {
        assert!(is_supported_mime_type("image/jpg"));
        assert!(is_supported_mime_type("image/jpeg"));
        assert!(is_supported_mime_type("image/png"));
        assert!(is_supported_mime_type("image/webp"));
        assert!(!is_supported_mime_type("image/gif"));
        assert!(!is_supported_mime_type("application/octet-stream"));
    }

    #[tokio::test]
    async fn test_compress_rejects_unsupported_format() {
        let file = FileArtifact::new("anim.gif", "image/gif", vec![0u8; 16]);
        let result = compress_image(&file, CompressOptions::default()).await;
        assert!(matches!(result, Err(AppError::UnsupportedFormat { .. })));
    }

    #[tokio::test]
    async fn test_compress_rejects_undecodable_bytes() {
        let file = FileArtifact::new("broken.png", "image/png", b"definitely not a png".to_vec());
        let result = compress_image(&file, CompressOptions::default()).await;
        match result {
            Err(error) => assert!(error.is_codec_error(), "unexpected error: {}", error),
            Ok(_) => panic!("Should fail for undecodable input"),
        }
    }

    #[tokio::test]
    async fn test_compress_rejects_invalid_quality() {
        let file = FileArtifact::new("a.png", "image/png", encoded_image(4, 4, ImageFormat::Png));
        let options = CompressOptions {
            quality: 1.5,
            ..Default::default()
        };
        let result = compress_image(&file, options).await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_compress_downscales_wide_image() {
        let file = FileArtifact::new(
            "wide.png",
            "image/png",
            encoded_image(2000, 1000, ImageFormat::Png),
        );
        let options = CompressOptions {
            max_width: 1000,
            max_height: 1000,
            quality: 0.8,
        };

        let compressed = compress_image(&file, options).await.unwrap();

        assert_eq!(compressed.name, "wide.webp");
        assert_eq!(compressed.mime_type, "image/webp");
        assert!(compressed.size() > 0);

        let (width, height, _) = get_image_info(&compressed).unwrap();
        assert_eq!((width, height), (1000, 500));

        // The input is not mutated
        assert_eq!(file.name, "wide.png");
        assert_eq!(file.mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_compress_keeps_small_jpeg_dimensions() {
        let file = FileArtifact::new(
            "small.jpg",
            "image/jpg",
            encoded_image(120, 80, ImageFormat::Jpeg),
        );
        let compressor = WebpCompressor::new(CompressOptions {
            max_width: 1000,
            max_height: 1000,
            quality: 0.5,
        });

        let compressed = compressor.compress(&file).await.unwrap();
        let (width, height, size) = get_image_info(&compressed).unwrap();
        assert_eq!((width, height), (120, 80));
        assert_eq!(size, compressed.size());
    }
}
