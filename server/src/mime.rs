//! Media type classification of uploaded files.
//!
//! Signals are tried in order of trust and the first usable one wins:
//! the client declared type (only when it is an allowed image type), magic
//! bytes, the declared name's extension, the image decoder's format guess and
//! finally a small built-in extension table.

use std::path::Path;

use image::ImageReader;

use crate::config::{Capabilities, Config};

pub const OCTET_STREAM: &str = "application/octet-stream";

pub struct MimeClassifier {
    allowed: Vec<String>,
    capabilities: Capabilities,
}

impl MimeClassifier {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            allowed: config.allowed_mime_types.clone(),
            capabilities: config.capabilities,
        }
    }

    /// Always yields a type, possibly `application/octet-stream`.
    pub fn classify(&self, file_path: &Path, declared_name: &str, declared_type: Option<&str>) -> String {
        if let Some(declared) = declared_type
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty() && t != OCTET_STREAM)
        {
            if self.allowed.contains(&declared) {
                return declared;
            }
        }

        if self.capabilities.magic_bytes {
            match infer::get_from_path(file_path) {
                Ok(Some(kind)) if kind.mime_type() != OCTET_STREAM => {
                    return kind.mime_type().to_owned();
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("content sniffing of {} failed: {e}", file_path.display()),
            }
        }

        if let Some(guess) = mime_guess::from_path(declared_name).first_raw() {
            if guess != OCTET_STREAM {
                return guess.to_owned();
            }
        }

        if self.capabilities.image_decoding {
            if let Some(format) = ImageReader::open(file_path)
                .and_then(ImageReader::with_guessed_format)
                .ok()
                .and_then(|reader| reader.format())
            {
                return format.to_mime_type().to_owned();
            }
        }

        by_extension(declared_name)
            .or_else(|| file_path.to_str().and_then(by_extension))
            .unwrap_or(OCTET_STREAM)
            .to_owned()
    }
}

/// Lower-cased extension of a file name, if any.
pub fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_ascii_lowercase)
}

fn by_extension(name: &str) -> Option<&'static str> {
    match extension(name)?.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    pub fn image_bytes(format: ImageFormat, width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 120, 200, 255]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .to_rgb8()
            .write_to(&mut buf, format)
            .unwrap();
        buf.into_inner()
    }

    pub fn temp_with(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn classifier(magic_bytes: bool, image_decoding: bool) -> MimeClassifier {
        let mut config = Config::new("/tmp/uploads");
        config.capabilities = Capabilities {
            magic_bytes,
            image_decoding,
        };
        MimeClassifier::new(&config)
    }

    #[test]
    fn allowed_declared_type_is_trusted() {
        // Arrange
        let file = temp_with(b"not really an image");

        // Act
        let t = classifier(true, true).classify(file.path(), "a.bin", Some("Image/PNG"));

        // Assert
        assert_eq!(t, "image/png");
    }

    #[test]
    fn disallowed_declared_type_falls_through_to_sniffing() {
        // Arrange
        let file = temp_with(&image_bytes(ImageFormat::Png, 4, 4));

        // Act
        let t = classifier(true, true).classify(file.path(), "a", Some("text/html"));

        // Assert
        assert_eq!(t, "image/png");
    }

    #[test]
    fn magic_bytes_win_over_extension() {
        // Arrange
        let file = temp_with(&image_bytes(ImageFormat::Jpeg, 4, 4));

        // Act
        let t = classifier(true, true).classify(file.path(), "photo.png", None);

        // Assert
        assert_eq!(t, "image/jpeg");
    }

    #[test]
    fn extension_lookup_when_sniffing_disabled() {
        // Arrange
        let file = temp_with(&image_bytes(ImageFormat::Jpeg, 4, 4));

        // Act
        let t = classifier(false, true).classify(file.path(), "photo.png", None);

        // Assert
        assert_eq!(t, "image/png");
    }

    #[test]
    fn decoder_guess_without_extension() {
        // Arrange
        let file = temp_with(&image_bytes(ImageFormat::Gif, 4, 4));

        // Act
        let t = classifier(false, true).classify(file.path(), "upload", None);

        // Assert
        assert_eq!(t, "image/gif");
    }

    #[rstest]
    #[case("blob", "application/octet-stream")]
    #[case("", "application/octet-stream")]
    #[trace]
    fn unknown_content_is_octet_stream(#[case] name: &str, #[case] expected: &str) {
        // Arrange
        let file = temp_with(b"\x00\x01\x02 plain bytes");

        // Act
        let t = classifier(true, true).classify(file.path(), name, None);

        // Assert
        assert_eq!(t, expected);
    }

    #[rstest]
    #[case("a.JPG", Some("image/jpeg"))]
    #[case("a.jpeg", Some("image/jpeg"))]
    #[case("dir/a.png", Some("image/png"))]
    #[case("a.gif", Some("image/gif"))]
    #[case("a.webp", None)]
    #[case("a", None)]
    #[trace]
    fn extension_table(#[case] name: &str, #[case] expected: Option<&str>) {
        // Act
        let t = by_extension(name);

        // Assert
        assert_eq!(t, expected);
    }
}
