use std::path::Path;

use image::{ImageFormat, ImageReader, Limits};

use crate::config::{Capabilities, Config};

/// Maximum image side accepted by the decoder. Guards against decompression bombs.
pub const MAX_IMAGE_DIMENSION: u32 = 16384;

/// Confirms that a classified file really is a decodable image of that type.
pub struct ImageValidator {
    allowed: Vec<String>,
    capabilities: Capabilities,
}

impl ImageValidator {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            allowed: config.allowed_mime_types.clone(),
            capabilities: config.capabilities,
        }
    }

    /// Only allowed types pass. With a decoder available the file must also
    /// decode, as the format the type names when that format is known.
    pub fn validate(&self, file_path: &Path, classified_type: &str) -> bool {
        if !self.is_allowed(classified_type) {
            tracing::info!("{classified_type} is not an allowed upload type");
            return false;
        }
        if !self.capabilities.image_decoding {
            return true;
        }

        let format = match decode_format(file_path) {
            Ok(format) => format,
            Err(e) => {
                tracing::info!("{} is not a decodable image: {e}", file_path.display());
                return false;
            }
        };

        expected_format(classified_type).is_none_or(|expected| expected == format)
    }

    fn is_allowed(&self, mime_type: &str) -> bool {
        self.allowed.iter().any(|t| t == mime_type)
    }
}

/// Image format a media type must decode as, for the types we know.
pub fn expected_format(mime_type: &str) -> Option<ImageFormat> {
    match mime_type {
        "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
        "image/png" => Some(ImageFormat::Png),
        "image/gif" => Some(ImageFormat::Gif),
        "image/webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Fully decodes the file and returns the format the decoder detected.
fn decode_format(file_path: &Path) -> Result<ImageFormat, String> {
    let mut reader = ImageReader::open(file_path)
        .and_then(ImageReader::with_guessed_format)
        .map_err(|e| e.to_string())?;
    let format = reader
        .format()
        .ok_or_else(|| String::from("unrecognized image format"))?;
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
    limits.max_image_height = Some(MAX_IMAGE_DIMENSION);
    reader.limits(limits);
    reader.decode().map_err(|e| e.to_string())?;
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::tests::{image_bytes, temp_with};
    use rstest::rstest;

    fn validator(image_decoding: bool) -> ImageValidator {
        let mut config = Config::new("/tmp/uploads");
        config.capabilities.image_decoding = image_decoding;
        ImageValidator::new(&config)
    }

    #[rstest]
    #[case(ImageFormat::Png, "image/png", true)]
    #[case(ImageFormat::Jpeg, "image/jpeg", true)]
    #[case(ImageFormat::Jpeg, "image/jpg", true)]
    #[case(ImageFormat::Gif, "image/gif", true)]
    #[case(ImageFormat::Jpeg, "image/png", false)]
    #[case(ImageFormat::Png, "image/gif", false)]
    #[case(ImageFormat::Png, "image/bmp", false)]
    #[case(ImageFormat::WebP, "image/webp", false)]
    #[trace]
    fn decoded_format_must_match(#[case] format: ImageFormat, #[case] mime: &str, #[case] expected: bool) {
        // Arrange
        let file = temp_with(&image_bytes(format, 8, 6));

        // Act
        let valid = validator(true).validate(file.path(), mime);

        // Assert
        assert_eq!(valid, expected);
    }

    #[test]
    fn text_disguised_as_jpeg_rejected() {
        // Arrange
        let file = temp_with(b"just some text, definitely not a photo");

        // Act
        let valid = validator(true).validate(file.path(), "image/jpeg");

        // Assert
        assert!(!valid);
    }

    #[test]
    fn truncated_png_rejected() {
        // Arrange
        let bytes = image_bytes(ImageFormat::Png, 32, 32);
        let file = temp_with(&bytes[..bytes.len() / 2]);

        // Act
        let valid = validator(true).validate(file.path(), "image/png");

        // Assert
        assert!(!valid);
    }

    #[rstest]
    #[case("image/png", true)]
    #[case("image/jpeg", true)]
    #[case("text/plain", false)]
    #[trace]
    fn without_decoder_only_allowed_types_pass(#[case] mime: &str, #[case] expected: bool) {
        // Arrange
        let file = temp_with(b"anything");

        // Act
        let valid = validator(false).validate(file.path(), mime);

        // Assert
        assert_eq!(valid, expected);
    }
}
