#![allow(clippy::unused_async)]
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{ConnectInfo, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use kernel::{ClearResult, DeleteResult, GalleryPage, UploadData, UploadRecord, UploadReply};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use utoipa::{IntoParams, ToSchema};

use crate::config::Config;
use crate::domain::UploadLog;
use crate::error::{AdminError, UploadError};
use crate::file_reply::PhotoReply;
use crate::json_log::within_root;
use crate::pipeline::{IncomingUpload, UploadPipeline};
use crate::AppState;

pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";
const PHOTO_FIELD: &str = "photo";
const METADATA_FIELD: &str = "metadata";

/// Multipart body of an upload. Only described for the OpenAPI document.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    photo: Vec<u8>,
    /// JSON object stored with the photo
    metadata: Option<String>,
}

/// Uploads one photo from the `photo` field of a multipart form.
#[utoipa::path(
    post,
    path = "/upload",
    tag = "upload",
    request_body(content = inline(UploadForm), content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Photo stored", body = UploadReply),
        (status = 400, description = "Upload rejected", body = kernel::ErrorReply),
        (status = 401, description = "Missing or wrong bearer token", body = kernel::ErrorReply),
    ),
    security(("bearer" = [])),
)]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadReply>, UploadError> {
    authorize_upload(&state.config, &headers)?;

    let mut multipart = multipart.map_err(|e| {
        tracing::debug!("not a multipart upload: {e}");
        UploadError::NoFileProvided
    })?;

    let mut upload = IncomingUpload {
        client_ip: connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned),
        ..IncomingUpload::default()
    };
    let mut has_photo = false;
    while let Some(field) = multipart.next_field().await.map_err(transport_error)? {
        let name = field.name().map(ToOwned::to_owned);
        match name.as_deref() {
            Some(PHOTO_FIELD) if !has_photo => {
                has_photo = true;
                upload.original_name = field.file_name().unwrap_or_default().to_owned();
                upload.declared_type = field.content_type().map(ToOwned::to_owned);
                upload.data = read_photo(field, &state.pipeline).await?;
            }
            Some(METADATA_FIELD) => {
                upload.metadata = Some(field.text().await.map_err(transport_error)?);
            }
            _ => {}
        }
    }
    if !has_photo {
        return Err(UploadError::NoFileProvided);
    }

    let worker = Arc::clone(&state);
    let accepted = tokio::task::spawn_blocking(move || worker.pipeline.process(upload))
        .await
        .map_err(|e| UploadError::StorageMoveError(e.to_string()))??;

    Ok(Json(UploadReply {
        success: true,
        message: "File uploaded successfully".to_owned(),
        data: UploadData::from(&accepted.record),
    }))
}

/// CORS preflight for `/upload`.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub async fn method_not_allowed() -> UploadError {
    UploadError::MethodNotAllowed
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// 1-based page number
    pub page: Option<usize>,
}

/// Lists uploaded photos, newest first.
#[utoipa::path(
    get,
    path = "/api/gallery",
    tag = "gallery",
    params(PageQuery),
    responses(
        (status = 200, description = "One page of the gallery", body = GalleryPage),
    ),
)]
pub async fn gallery(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<GalleryPage>, AdminError> {
    let per_page = state.config.gallery_per_page;
    let page = query.page.unwrap_or(1);
    if !state.config.gallery_enabled {
        return Ok(Json(GalleryPage::paginate(Vec::new(), page, per_page)));
    }
    let photos = load_records(&state).await?;
    Ok(Json(GalleryPage::paginate(photos, page, per_page)))
}

/// Deletes one photo with its thumbnail and log entry.
#[utoipa::path(
    delete,
    path = "/api/gallery/{id}",
    tag = "gallery",
    params(
        ("id" = String, Path, description = "Photo id")
    ),
    responses(
        (status = 200, description = "Photo deleted", body = DeleteResult),
        (status = 401, description = "Wrong admin password", body = kernel::ErrorReply),
        (status = 403, description = "Administration disabled", body = kernel::ErrorReply),
        (status = 404, description = "Photo not found", body = kernel::ErrorReply),
    ),
    security(("admin_password" = [])),
)]
pub async fn delete_photo(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DeleteResult>, AdminError> {
    authorize_admin(&state.config, &headers)?;

    let worker = Arc::clone(&state);
    let target = id.clone();
    let deleted = tokio::task::spawn_blocking(move || worker.log.delete_by_id(&target))
        .await
        .map_err(|e| AdminError::Log(e.to_string()))?
        .map_err(|e| AdminError::Log(e.to_string()))?;

    if deleted {
        tracing::info!("photo {id} deleted");
        Ok(Json(DeleteResult { id, deleted }))
    } else {
        tracing::info!("photo {id} not found");
        Err(AdminError::NotFound)
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ClearQuery {
    /// Must be `yes`
    pub confirm: Option<String>,
}

/// Removes every stored photo and empties the upload log.
#[utoipa::path(
    delete,
    path = "/api/gallery",
    tag = "gallery",
    params(ClearQuery),
    responses(
        (status = 200, description = "Gallery cleared", body = ClearResult),
        (status = 400, description = "Missing confirmation", body = kernel::ErrorReply),
        (status = 401, description = "Wrong admin password", body = kernel::ErrorReply),
        (status = 403, description = "Administration disabled", body = kernel::ErrorReply),
    ),
    security(("admin_password" = [])),
)]
pub async fn clear_gallery(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClearQuery>,
    headers: HeaderMap,
) -> Result<Json<ClearResult>, AdminError> {
    authorize_admin(&state.config, &headers)?;
    if query.confirm.as_deref() != Some("yes") {
        return Err(AdminError::NotConfirmed);
    }

    let worker = Arc::clone(&state);
    let files = tokio::task::spawn_blocking(move || worker.log.clear_all())
        .await
        .map_err(|e| AdminError::Log(e.to_string()))?
        .map_err(|e| AdminError::Log(e.to_string()))?;
    tracing::info!("gallery cleared, {files} files removed");
    Ok(Json(ClearResult { files }))
}

/// Gets the original photo as an attachment named after the client's file name.
#[utoipa::path(
    get,
    path = "/api/gallery/{id}/download",
    tag = "gallery",
    params(
        ("id" = String, Path, description = "Photo id")
    ),
    responses(
        (status = 200, response = PhotoReply),
        (status = 404, description = "Photo not found", body = kernel::ErrorReply),
    ),
)]
pub async fn download(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<PhotoReply, AdminError> {
    if !state.config.gallery_enabled {
        return Err(AdminError::NotFound);
    }
    let record = load_records(&state)
        .await?
        .into_iter()
        .find(|r| r.id == id)
        .ok_or(AdminError::NotFound)?;

    let path = std::path::Path::new(&record.storage_path);
    if !within_root(path, &state.config.upload_dir) {
        tracing::warn!("photo {id} points outside of upload root");
        return Err(AdminError::NotFound);
    }
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        tracing::info!("photo {id} is gone: {e}");
        AdminError::NotFound
    })?;
    let size = file
        .metadata()
        .await
        .map_err(|e| AdminError::Log(e.to_string()))?
        .len();
    Ok(PhotoReply::new(file, size, record))
}

async fn load_records(state: &Arc<AppState>) -> Result<Vec<UploadRecord>, AdminError> {
    let worker = Arc::clone(state);
    tokio::task::spawn_blocking(move || worker.log.load_all())
        .await
        .map_err(|e| AdminError::Log(e.to_string()))?
        .map_err(|e| {
            tracing::error!("{e}");
            AdminError::Log(e.to_string())
        })
}

/// Buffers the photo, giving up on storage as soon as it exceeds the limit.
///
/// The rest of an oversized photo is still drained so the client gets a
/// reply instead of a reset connection.
async fn read_photo(mut field: Field<'_>, pipeline: &UploadPipeline) -> Result<Vec<u8>, UploadError> {
    let mut data = Vec::new();
    let mut received: u64 = 0;
    let mut too_large = None;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            // the body limit may cut off the drain of an oversized photo
            Err(e) => return Err(too_large.take().unwrap_or_else(|| transport_error(e))),
        };
        received += chunk.len() as u64;
        if too_large.is_some() {
            continue;
        }
        if let Err(e) = pipeline.check_size(received) {
            too_large = Some(e);
            data = Vec::new();
            continue;
        }
        data.extend_from_slice(&chunk);
    }
    match too_large {
        Some(e) => {
            tracing::info!("upload rejected after {received} bytes: {e}");
            Err(e)
        }
        None => Ok(data),
    }
}

fn transport_error(e: axum::extract::multipart::MultipartError) -> UploadError {
    tracing::warn!("multipart error: {e}");
    UploadError::UploadTransportError(e.body_text())
}

/// Bearer token check. Uploads are open when no API key is configured.
fn authorize_upload(config: &Config, headers: &HeaderMap) -> Result<(), UploadError> {
    let Some(expected) = config.api_key.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);
    match presented {
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        _ => {
            tracing::info!("upload rejected: bad or missing bearer token");
            Err(UploadError::Unauthorized)
        }
    }
}

fn authorize_admin(config: &Config, headers: &HeaderMap) -> Result<(), AdminError> {
    let Some(expected) = config.admin_password.as_deref() else {
        return Err(AdminError::Disabled);
    };
    let presented = headers
        .get(ADMIN_PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok());
    match presented {
        Some(password) if constant_time_eq(password, expected) => Ok(()),
        _ => {
            tracing::info!("admin request rejected: wrong password");
            Err(AdminError::Unauthorized)
        }
    }
}

/// Token of an `Authorization: Bearer <token>` value. Scheme is case insensitive.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(char::is_whitespace)?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

fn constant_time_eq(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
