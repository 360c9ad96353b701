use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use kernel::UploadRecord;
use tokio_util::io::ReaderStream;
use utoipa::{
    openapi::{self, content, ObjectBuilder, RefOr, ResponseBuilder, Type},
    ToResponse,
};

/// Stored original streamed back as an attachment.
pub struct PhotoReply {
    file: tokio::fs::File,
    size: u64,
    record: UploadRecord,
}

impl PhotoReply {
    #[must_use]
    pub fn new(file: tokio::fs::File, size: u64, record: UploadRecord) -> Self {
        Self { file, size, record }
    }

    /// Client supplied name reduced to something safe for a header value.
    fn attachment_name(&self) -> String {
        let name: String = name_from_path(&self.record.original_name)
            .chars()
            .filter(|c| !c.is_control() && *c != '"')
            .collect();
        if name.trim().is_empty() {
            self.record.filename.clone()
        } else {
            name
        }
    }
}

fn name_from_path(path: &str) -> &str {
    if let Some(ix) = path.rfind(['\\', '/']) {
        &path[ix + 1..]
    } else {
        path
    }
}

impl IntoResponse for PhotoReply {
    fn into_response(self) -> Response {
        let file_name = self.attachment_name();
        let mut res = Body::from_stream(ReaderStream::new(self.file)).into_response();
        let headers = res.headers_mut();
        let content_type = HeaderValue::from_str(&self.record.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
        headers.insert(header::CONTENT_TYPE, content_type);
        let attachment = format!(r#"attachment; filename="{file_name}""#);
        if let Ok(val) = HeaderValue::from_str(attachment.as_str()) {
            headers.insert(header::CONTENT_DISPOSITION, val);
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.size));

        res
    }
}

impl ToResponse<'static> for PhotoReply {
    fn response() -> (&'static str, RefOr<openapi::Response>) {
        let object = ObjectBuilder::new()
            .schema_type(Type::String)
            .format(Some(openapi::SchemaFormat::KnownFormat(
                openapi::KnownFormat::Binary,
            )))
            .build();
        let content = content::Content::new(Some(object));
        (
            "PhotoReply",
            ResponseBuilder::new()
                .description("Original photo content")
                .content("image/*", content)
                .build()
                .into(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", "")]
    #[case("photo.jpg", "photo.jpg")]
    #[case("DCIM/photo.jpg", "photo.jpg")]
    #[case("C:\\Users\\booth\\photo.jpg", "photo.jpg")]
    #[case("dir1/dir2/photo.jpg", "photo.jpg")]
    #[trace]
    fn name_from_path_cases(#[case] path: &str, #[case] expected: &str) {
        // Act
        let name = name_from_path(path);

        // Assert
        assert_eq!(name, expected);
    }

    #[rstest]
    #[case("../../etc/passwd", "passwd")]
    #[case("a\"b\r\n.jpg", "ab.jpg")]
    #[case("", "photobox_2025-01-01_10-00-00_00000001.png")]
    #[case("dir/", "photobox_2025-01-01_10-00-00_00000001.png")]
    #[trace]
    #[tokio::test]
    async fn attachment_name_is_sanitized(#[case] original: &str, #[case] expected: &str) {
        // Arrange
        let dir = tempfile::TempDir::new().unwrap();
        let mut record = crate::json_log::tests::record(dir.path(), 1);
        record.original_name = original.to_owned();
        let path = dir.path().join("f");
        std::fs::write(&path, b"x").unwrap();
        let file = tokio::fs::File::open(&path).await.unwrap();
        let reply = PhotoReply::new(file, 1, record);

        // Act
        let name = reply.attachment_name();

        // Assert
        assert_eq!(name, expected);
    }
}
