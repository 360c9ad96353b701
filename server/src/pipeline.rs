//! Single request upload pipeline.
//!
//! `Received -> Authorized -> SizeChecked -> Classified -> Validated -> Stored
//! -> Thumbnailed -> Logged -> Responded`. Authorization and multipart intake
//! happen in the HTTP handler; everything from the size check on is here.
//! Failures up to `Stored` reject the upload. Thumbnail and log failures only
//! degrade it: the upload is still accepted and the reply says so implicitly
//! through a missing thumbnail.

use std::fmt;
use std::fs;
use std::io::Write;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime, Timelike};
use kernel::{UploadRecord, UNKNOWN};
use serde_json::Value;

use crate::config::Config;
use crate::domain::UploadLog;
use crate::error::UploadError;
use crate::json_log::{JsonLog, LogError};
use crate::mime::{self, MimeClassifier};
use crate::thumbnail::{ThumbnailError, ThumbnailGenerator, THUMBNAIL_DIR, THUMBNAIL_PREFIX};
use crate::validator::ImageValidator;

const ACCEPTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];
pub(crate) const TEMP_PREFIX: &str = ".incoming-";

/// A received photo, already pulled out of the multipart form.
#[derive(Debug, Default)]
pub struct IncomingUpload {
    pub original_name: String,
    pub declared_type: Option<String>,
    pub data: Vec<u8>,
    /// Raw `metadata` form field
    pub metadata: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SizeChecked,
    Classified,
    Validated,
    Stored,
    Thumbnailed,
    Logged,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SizeChecked => "size-check",
            Self::Classified => "classify",
            Self::Validated => "validate",
            Self::Stored => "store",
            Self::Thumbnailed => "thumbnail",
            Self::Logged => "log",
        };
        f.write_str(name)
    }
}

/// Non fatal problem of an accepted upload.
#[derive(Debug)]
pub enum Degradation {
    Thumbnail(ThumbnailError),
    Log(LogError),
}

impl Degradation {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Thumbnail(_) => Stage::Thumbnailed,
            Self::Log(_) => Stage::Logged,
        }
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thumbnail(e) => write!(f, "thumbnail skipped: {e}"),
            Self::Log(e) => write!(f, "upload not logged: {e}"),
        }
    }
}

/// Outcome of an accepted upload.
#[derive(Debug)]
pub struct Accepted {
    pub record: UploadRecord,
    pub degradations: Vec<Degradation>,
}

pub struct UploadPipeline {
    config: Arc<Config>,
    classifier: MimeClassifier,
    validator: ImageValidator,
    thumbnails: ThumbnailGenerator,
    log: Arc<JsonLog>,
}

impl UploadPipeline {
    #[must_use]
    pub fn new(config: Arc<Config>, log: Arc<JsonLog>) -> Self {
        Self {
            classifier: MimeClassifier::new(&config),
            validator: ImageValidator::new(&config),
            thumbnails: ThumbnailGenerator::new(&config),
            config,
            log,
        }
    }

    /// Rejects sizes above the configured maximum.
    pub fn check_size(&self, size: u64) -> Result<(), UploadError> {
        if size > self.config.max_file_size {
            return Err(UploadError::FileTooLarge {
                max_size: self.config.max_file_size,
            });
        }
        Ok(())
    }

    /// Runs the pipeline. Blocking: call it from a blocking thread.
    pub fn process(&self, upload: IncomingUpload) -> Result<Accepted, UploadError> {
        if upload.data.is_empty() {
            return Err(rejected(Stage::SizeChecked, UploadError::NoFileProvided));
        }
        let size = upload.data.len() as u64;
        self.check_size(size)
            .map_err(|e| rejected(Stage::SizeChecked, e))?;

        let root = &self.config.upload_dir;
        fs::create_dir_all(root)
            .map_err(|e| rejected(Stage::Stored, directory_error("upload directory", &e)))?;

        let mut incoming = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(root)
            .map_err(|e| rejected(Stage::Stored, directory_error("temporary upload file", &e)))?;
        incoming
            .write_all(&upload.data)
            .and_then(|()| incoming.flush())
            .map_err(|e| rejected(Stage::Stored, UploadError::StorageMoveError(e.to_string())))?;
        drop(upload.data);

        let mime_type = self.classifier.classify(
            incoming.path(),
            &upload.original_name,
            upload.declared_type.as_deref(),
        );
        tracing::debug!(stage = %Stage::Classified, "{} classified as {mime_type}", upload.original_name);

        if !self.validator.validate(incoming.path(), &mime_type) {
            return Err(rejected(Stage::Validated, UploadError::InvalidFileType { mime_type }));
        }

        let uploaded_at = now();
        let id = random_token();
        let extension = normalized_extension(&upload.original_name, &mime_type);
        let filename = format!(
            "{}_{}_{id}.{extension}",
            self.config.filename_prefix,
            uploaded_at.format("%Y-%m-%d_%H-%M-%S")
        );
        let date_dir = uploaded_at.format("%Y/%m/%d").to_string();
        let target_dir = root.join(&date_dir);
        fs::create_dir_all(&target_dir)
            .map_err(|e| rejected(Stage::Stored, directory_error("target directory", &e)))?;

        let target = target_dir.join(&filename);
        incoming
            .persist_noclobber(&target)
            .map_err(|e| rejected(Stage::Stored, UploadError::StorageMoveError(e.error.to_string())))?;
        tracing::info!("stored {} ({size} bytes) as {}", upload.original_name, target.display());

        let mut degradations = Vec::new();
        let public_dir = format!("{}/uploads/{date_dir}", self.config.base_url);

        let thumbnail_url = if self.config.create_thumbnails {
            match self
                .thumbnails
                .generate(&target, &target_dir, &filename, self.config.thumbnail_size)
            {
                Ok(_) => Some(format!("{public_dir}/{THUMBNAIL_DIR}/{THUMBNAIL_PREFIX}{filename}")),
                Err(e) => {
                    degradations.push(Degradation::Thumbnail(e));
                    None
                }
            }
        } else {
            None
        };

        let record = UploadRecord {
            id,
            url: format!("{public_dir}/{filename}"),
            filename,
            original_name: upload.original_name,
            size_bytes: size,
            mime_type,
            storage_path: target.to_string_lossy().into_owned(),
            thumbnail_url,
            uploaded_at,
            client_ip: upload.client_ip.unwrap_or_else(|| UNKNOWN.to_owned()),
            user_agent: upload.user_agent.unwrap_or_else(|| UNKNOWN.to_owned()),
            metadata: upload.metadata.as_deref().and_then(parse_metadata),
        };

        if let Err(e) = self.log.append(&record) {
            degradations.push(Degradation::Log(e));
        }

        for degradation in &degradations {
            tracing::warn!(stage = %degradation.stage(), id = %record.id, "{degradation}");
        }

        Ok(Accepted {
            record,
            degradations,
        })
    }
}

fn rejected(stage: Stage, error: UploadError) -> UploadError {
    tracing::info!(%stage, "upload rejected: {error}");
    error
}

fn directory_error(what: &str, e: &std::io::Error) -> UploadError {
    tracing::error!("cannot create {what}: {e}");
    UploadError::StorageDirectoryError(what.to_owned())
}

fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Eight lowercase hex characters.
fn random_token() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// Keeps the client's extension when it is an accepted image extension that
/// agrees with the classified type, otherwise derives one from the type.
fn normalized_extension(original_name: &str, mime_type: &str) -> String {
    let from_type = match mime_type {
        "image/png" => "png",
        "image/gif" => "gif",
        _ => "jpg",
    };
    match mime::extension(original_name) {
        Some(ext) if ACCEPTED_EXTENSIONS.contains(&ext.as_str()) => {
            let agrees = match ext.as_str() {
                "jpg" | "jpeg" => from_type == "jpg",
                other => other == from_type,
            };
            if agrees {
                ext
            } else {
                from_type.to_owned()
            }
        }
        _ => from_type.to_owned(),
    }
}

/// Client metadata is kept only when it is a JSON object.
fn parse_metadata(raw: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) => {
            tracing::debug!("ignoring non-object upload metadata");
            None
        }
        Err(e) => {
            tracing::debug!("ignoring malformed upload metadata: {e}");
            None
        }
    }
}
