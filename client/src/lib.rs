//! Booth side client of the photobox server.

use std::path::{Path, PathBuf};

use comfy_table::{presets::UTF8_HORIZONTAL_ONLY, Attribute, Cell, ContentArrangement, Table};
use kernel::{ClearResult, DeleteResult, ErrorReply, GalleryPage, UploadReply, UPLOAD_TIME_FORMAT};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use resource::Endpoint;
use serde_json::Value;
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

pub mod resource;

pub const ADMIN_PASSWORD_HEADER: &str = "X-Admin-Password";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server URI: {0}")]
    InvalidUri(String),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("metadata must be a JSON object")]
    InvalidMetadata,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server replied {status}: {error}")]
    Rejected { status: u16, error: String },
}

pub struct UploadParams {
    pub uri: String,
    pub file: PathBuf,
    /// Bearer token, when the server requires one
    pub token: Option<String>,
    /// JSON object stored with the photo
    pub metadata: Option<String>,
}

/// Uploads one photo as the `photo` field of a multipart form.
pub async fn upload_photo(params: UploadParams) -> Result<UploadReply, ClientError> {
    let endpoint = endpoint(&params.uri, "upload")?;
    if let Some(metadata) = &params.metadata {
        check_metadata(metadata)?;
    }

    let io_error = |source| ClientError::Io {
        path: params.file.clone(),
        source,
    };
    let f = File::open(&params.file).await.map_err(io_error)?;
    let len = f.metadata().await.map_err(io_error)?.len();
    let stream = reqwest::Body::wrap_stream(ReaderStream::new(f));
    let mime = mime_guess::from_path(&params.file).first_or_octet_stream();
    let part = Part::stream_with_length(stream, len)
        .file_name(file_name(&params.file))
        .mime_str(mime.essence_str())?;

    let mut form = Form::new().part("photo", part);
    if let Some(metadata) = params.metadata {
        form = form.text("metadata", metadata);
    }

    let mut request = Client::new().post(endpoint.to_string()).multipart(form);
    if let Some(token) = &params.token {
        request = request.bearer_auth(token);
    }
    send(request).await
}

pub async fn gallery(uri: &str, page: usize) -> Result<GalleryPage, ClientError> {
    let mut endpoint = endpoint(uri, "api/gallery")?;
    endpoint.query("page", &page.to_string());
    send(Client::new().get(endpoint.to_string())).await
}

pub async fn delete_photo(uri: &str, id: &str, admin_password: &str) -> Result<DeleteResult, ClientError> {
    let endpoint = endpoint(uri, &format!("api/gallery/{id}"))?;
    let request = Client::new()
        .delete(endpoint.to_string())
        .header(ADMIN_PASSWORD_HEADER, admin_password);
    send(request).await
}

pub async fn clear_gallery(uri: &str, admin_password: &str) -> Result<ClearResult, ClientError> {
    let mut endpoint = endpoint(uri, "api/gallery")?;
    endpoint.query("confirm", "yes");
    let request = Client::new()
        .delete(endpoint.to_string())
        .header(ADMIN_PASSWORD_HEADER, admin_password);
    send(request).await
}

#[must_use]
pub fn render_gallery(page: &GalleryPage) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120)
        .set_header(vec![
            Cell::new("Id").add_attribute(Attribute::Bold),
            Cell::new("Uploaded").add_attribute(Attribute::Bold),
            Cell::new("Original name").add_attribute(Attribute::Bold),
            Cell::new("Size").add_attribute(Attribute::Bold),
            Cell::new("URL").add_attribute(Attribute::Bold),
        ]);

    for p in &page.photos {
        table.add_row(vec![
            Cell::new(&p.id),
            Cell::new(p.uploaded_at.format(UPLOAD_TIME_FORMAT)),
            Cell::new(&p.original_name),
            Cell::new(p.size_bytes),
            Cell::new(&p.url),
        ]);
    }
    table
}

fn endpoint(uri: &str, path: &str) -> Result<Endpoint, ClientError> {
    let mut endpoint = Endpoint::new(uri).ok_or_else(|| ClientError::InvalidUri(uri.to_owned()))?;
    endpoint.join(path);
    Ok(endpoint)
}

fn check_metadata(metadata: &str) -> Result<(), ClientError> {
    match serde_json::from_str::<Value>(metadata) {
        Ok(Value::Object(_)) => Ok(()),
        _ => Err(ClientError::InvalidMetadata),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn send<T: serde::de::DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
    let response = request.send().await?;
    if response.status().is_success() {
        Ok(response.json().await?)
    } else {
        Err(rejected(response).await)
    }
}

async fn rejected(response: Response) -> ClientError {
    let status = response.status();
    let error = match response.json::<ErrorReply>().await {
        Ok(reply) => reply.error,
        Err(_) => status.canonical_reason().unwrap_or_default().to_owned(),
    };
    ClientError::Rejected {
        status: status.as_u16(),
        error,
    }
}
