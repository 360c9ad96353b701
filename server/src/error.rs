use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kernel::ErrorReply;
use thiserror::Error;

/// Reasons an upload request is rejected.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("No photo file provided")]
    NoFileProvided,

    /// The multipart transport failed before the photo was fully received.
    #[error("Upload error: {0}")]
    UploadTransportError(String),

    #[error("File too large. Max size: {}MB", format_megabytes(*max_size))]
    FileTooLarge { max_size: u64 },

    #[error("Invalid file type: {mime_type}. Must be valid image (JPEG, PNG, GIF)")]
    InvalidFileType { mime_type: String },

    #[error("Cannot create {0}")]
    StorageDirectoryError(String),

    #[error("Failed to move uploaded file: {0}")]
    StorageMoveError(String),
}

impl UploadError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status();
        // 401 and 405 bodies carry no success flag
        let success = (status == StatusCode::BAD_REQUEST).then_some(false);
        let body = ErrorReply {
            success,
            error: self.to_string(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// Errors of admin gallery actions.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Gallery administration is disabled")]
    Disabled,
    #[error("Clearing the gallery requires confirm=yes")]
    NotConfirmed,
    #[error("Photo not found")]
    NotFound,
    #[error("Upload log error: {0}")]
    Log(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Disabled => StatusCode::FORBIDDEN,
            Self::NotConfirmed => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Log(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorReply {
            success: Some(false),
            error: self.to_string(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// Megabytes rounded to one decimal, without a trailing `.0`.
fn format_megabytes(bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let mb = (bytes as f64 / 1024.0 / 1024.0 * 10.0).round() / 10.0;
    if mb.fract() == 0.0 {
        format!("{mb:.0}")
    } else {
        format!("{mb:.1}")
    }
}
