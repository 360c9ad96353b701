//! Bounded-size thumbnails of validated uploads.
//!
//! Thumbnails are written next to the original as
//! `<dir>/thumbnails/thumb_<filename>` in the source's own format.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, ImageFormat, ImageReader, RgbaImage};
use thiserror::Error;

use crate::config::{Capabilities, Config};
use crate::validator::MAX_IMAGE_DIMENSION;

pub const THUMBNAIL_DIR: &str = "thumbnails";
pub const THUMBNAIL_PREFIX: &str = "thumb_";
const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("image decoding is not available")]
    Unavailable,
    #[error("unsupported thumbnail format {0:?}")]
    Unsupported(Option<ImageFormat>),
    #[error("cannot decode source: {0}")]
    Decode(String),
    #[error("cannot allocate {0}x{1} canvas")]
    Canvas(u32, u32),
    #[error("cannot create thumbnail directory: {0}")]
    Directory(std::io::Error),
    #[error("cannot encode thumbnail: {0}")]
    Encode(String),
}

pub struct ThumbnailGenerator {
    capabilities: Capabilities,
}

impl ThumbnailGenerator {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            capabilities: config.capabilities,
        }
    }

    pub fn generate(
        &self,
        source: &Path,
        target_dir: &Path,
        target_filename: &str,
        max_dimension: u32,
    ) -> Result<PathBuf, ThumbnailError> {
        if !self.capabilities.image_decoding {
            return Err(ThumbnailError::Unavailable);
        }

        let reader = ImageReader::open(source)
            .and_then(ImageReader::with_guessed_format)
            .map_err(|e| ThumbnailError::Decode(e.to_string()))?;
        let format = reader.format();
        if !matches!(format, Some(ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif)) {
            return Err(ThumbnailError::Unsupported(format));
        }
        let img = reader
            .decode()
            .map_err(|e| ThumbnailError::Decode(e.to_string()))?;

        let (width, height) = img.dimensions();
        let (new_width, new_height) = scaled_dimensions(width, height, max_dimension);
        if new_width > MAX_IMAGE_DIMENSION || new_height > MAX_IMAGE_DIMENSION {
            return Err(ThumbnailError::Canvas(new_width, new_height));
        }

        let thumbnail_dir = target_dir.join(THUMBNAIL_DIR);
        fs::create_dir_all(&thumbnail_dir).map_err(ThumbnailError::Directory)?;
        let target = thumbnail_dir.join(format!("{THUMBNAIL_PREFIX}{target_filename}"));

        let written = match format {
            Some(ImageFormat::Jpeg) => {
                let resized = imageops::resize(&img.to_rgb8(), new_width, new_height, FilterType::Triangle);
                write_thumbnail(&target, |w| {
                    JpegEncoder::new_with_quality(w, JPEG_QUALITY).write_image(
                        resized.as_raw(),
                        new_width,
                        new_height,
                        ExtendedColorType::Rgb8,
                    )
                })
            }
            Some(ImageFormat::Png) => {
                let canvas = transparent_resample(&img, new_width, new_height);
                write_thumbnail(&target, |w| {
                    PngEncoder::new_with_quality(w, CompressionType::Best, PngFilter::Adaptive).write_image(
                        canvas.as_raw(),
                        new_width,
                        new_height,
                        ExtendedColorType::Rgba8,
                    )
                })
            }
            _ => {
                let canvas = transparent_resample(&img, new_width, new_height);
                write_thumbnail(&target, |w| {
                    GifEncoder::new(w).encode(canvas.as_raw(), new_width, new_height, ExtendedColorType::Rgba8)
                })
            }
        };

        match written {
            Ok(()) => Ok(target),
            Err(e) => {
                // a half written thumbnail is worse than none
                if let Err(cleanup) = fs::remove_file(&target) {
                    tracing::debug!("cannot remove {}: {cleanup}", target.display());
                }
                Err(e)
            }
        }
    }
}

/// Uniform scale to fit `max_dimension`. Small images are enlarged.
pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let ratio = f64::min(
        f64::from(max_dimension) / f64::from(width.max(1)),
        f64::from(max_dimension) / f64::from(height.max(1)),
    );
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let scale = |side: u32| ((f64::from(side) * ratio).round() as u32).max(1);
    (scale(width), scale(height))
}

/// Resamples in RGBA so the alpha channel of the source is kept.
fn transparent_resample(img: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    imageops::resize(&img.to_rgba8(), width, height, FilterType::Triangle)
}

fn write_thumbnail<F>(target: &Path, encode: F) -> Result<(), ThumbnailError>
where
    F: FnOnce(&mut BufWriter<File>) -> image::ImageResult<()>,
{
    let file = File::create(target).map_err(|e| ThumbnailError::Encode(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    encode(&mut writer).map_err(|e| ThumbnailError::Encode(e.to_string()))?;
    writer.flush().map_err(|e| ThumbnailError::Encode(e.to_string()))
}
