#![warn(clippy::unwrap_in_result)]
#![warn(clippy::unwrap_used)]

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Format used for `upload_time` both in the upload log and in replies.
pub const UPLOAD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Value recorded when request metadata such as client address is not available.
pub const UNKNOWN: &str = "unknown";

/// One accepted photo upload as persisted in the upload log.
///
/// JSON keys follow the historical log layout (`size`, `type`, `path`,
/// `thumbnail`, `upload_time`) so that logs written by older booth servers
/// keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UploadRecord {
    /// Short random identifier, also embedded into `filename`
    pub id: String,
    /// Server generated unique file name
    pub filename: String,
    /// File name as sent by the client. Untrusted, display only
    pub original_name: String,
    /// Size of the stored original in bytes
    #[serde(rename = "size")]
    pub size_bytes: u64,
    /// Classified media type
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Absolute server side path of the stored original
    #[serde(rename = "path")]
    pub storage_path: String,
    /// Public URL of the original
    pub url: String,
    /// Public URL of the thumbnail, `null` when no thumbnail was produced
    #[serde(rename = "thumbnail", default)]
    pub thumbnail_url: Option<String>,
    /// Upload time with second precision, server local time
    #[serde(rename = "upload_time", with = "upload_time")]
    #[schema(value_type = String, example = "2025-06-14 18:30:05")]
    pub uploaded_at: NaiveDateTime,
    #[serde(default = "unknown")]
    pub client_ip: String,
    #[serde(default = "unknown")]
    pub user_agent: String,
    /// Opaque client supplied object, stored verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
}

fn unknown() -> String {
    UNKNOWN.to_owned()
}

/// Payload of a successful upload reply.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadData {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub thumbnail: Option<String>,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub upload_time: String,
}

impl From<&UploadRecord> for UploadData {
    fn from(record: &UploadRecord) -> Self {
        Self {
            id: record.id.clone(),
            filename: record.filename.clone(),
            url: record.url.clone(),
            thumbnail: record.thumbnail_url.clone(),
            size: record.size_bytes,
            mime_type: record.mime_type.clone(),
            upload_time: record.uploaded_at.format(UPLOAD_TIME_FORMAT).to_string(),
        }
    }
}

/// Reply sent for an accepted upload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadReply {
    pub success: bool,
    pub message: String,
    pub data: UploadData,
}

/// Error body. `success` is omitted for authorization and method errors.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    pub error: String,
    pub code: u16,
}

/// One page of the gallery, newest uploads first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GalleryPage {
    pub photos: Vec<UploadRecord>,
    /// 1-based page number
    pub page: usize,
    pub per_page: usize,
    pub total_photos: usize,
    pub total_pages: usize,
}

impl GalleryPage {
    /// Sorts `photos` by upload time (newest first) and cuts out `page`.
    ///
    /// Pages below 1 are treated as the first page. Pages past the end yield
    /// an empty `photos` list but correct totals.
    #[must_use]
    pub fn paginate(mut photos: Vec<UploadRecord>, page: usize, per_page: usize) -> Self {
        let per_page = per_page.max(1);
        let page = page.max(1);
        photos.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        let total_photos = photos.len();
        let total_pages = total_photos.div_ceil(per_page);
        let photos = photos
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();
        Self {
            photos,
            page,
            per_page,
            total_photos,
            total_pages,
        }
    }
}

/// Result of an admin delete of a single photo.
#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
pub struct DeleteResult {
    /// Requested photo id
    pub id: String,
    /// Whether a log entry was found and removed
    pub deleted: bool,
}

/// Result of an admin clear of the whole gallery.
#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
pub struct ClearResult {
    /// Number of files removed from the upload directory
    pub files: usize,
}

mod upload_time {
    use super::UPLOAD_TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(UPLOAD_TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, UPLOAD_TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}
