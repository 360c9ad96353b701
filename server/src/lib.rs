use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderName, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    classify::ServerErrorsFailureClass,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::Span;
use utoipa::OpenApi;

pub mod api_doc;
pub mod config;
pub mod domain;
pub mod error;
pub mod file_reply;
mod handlers;
pub mod json_log;
pub mod mime;
pub mod pipeline;
pub mod retention;
pub mod thumbnail;
pub mod validator;

#[cfg(test)] // <-- not needed in integration tests
extern crate rstest;

use crate::config::Config;
use crate::error::UploadError;
use crate::json_log::{JsonLog, LOG_FILE};
use crate::pipeline::{UploadPipeline, TEMP_PREFIX};
use crate::retention::RetentionSweeper;

pub use handlers::ADMIN_PASSWORD_HEADER;

/// Shared by all request handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: UploadPipeline,
    pub log: Arc<JsonLog>,
}

impl AppState {
    /// Resolves the upload root to an absolute path and wires the components.
    pub fn new(mut config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.upload_dir).with_context(|| {
            format!("cannot create upload directory {}", config.upload_dir.display())
        })?;
        config.upload_dir = std::path::absolute(&config.upload_dir)?;
        let config = Arc::new(config);
        let log = Arc::new(JsonLog::new(&config.upload_dir, config.log_cap));
        Ok(Self {
            pipeline: UploadPipeline::new(Arc::clone(&config), Arc::clone(&log)),
            config,
            log,
        })
    }
}

/// Serves uploads with `config` until a termination signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(config)?);
    let config = Arc::clone(&state.config);

    if config.auto_delete_days > 0 {
        tracing::info!(
            "deleting uploads older than {} days every {:?}",
            config.auto_delete_days,
            config.sweep_interval
        );
        RetentionSweeper::new(&config.upload_dir, config.auto_delete_days).spawn(config.sweep_interval);
    }

    let socket = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(socket)
        .await
        .with_context(|| format!("cannot listen on {socket}"))?;
    tracing::debug!("listening on {socket}");
    tracing::info!("storing uploads in {}", config.upload_dir.display());

    serve(listener, create_routes(state), shutdown_signal()).await
}

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "server=debug,photobox=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .unwrap_or_default();
}

/// Serves `app` on `listener` until `shutdown` completes. Peer addresses are
/// made available to handlers.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

pub fn create_routes(state: Arc<AppState>) -> Router {
    let stored_files = ServiceBuilder::new()
        .layer(middleware::from_fn(hide_private_files))
        .service(ServeDir::new(&state.config.upload_dir));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(ADMIN_PASSWORD_HEADER),
        ]);

    let body_limit = state.config.body_limit();
    let max_file_size = state.config.max_file_size;

    Router::new()
        .route(
            "/upload",
            post(handlers::upload)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/gallery",
            get(handlers::gallery).delete(handlers::clear_gallery),
        )
        .route("/api/gallery/:id", delete(handlers::delete_photo))
        .route("/api/gallery/:id/download", get(handlers::download))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(api_doc::ApiDoc::openapi()) }),
        )
        .nest_service("/uploads", stored_files)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(middleware::map_response_with_state(
            max_file_size,
            payload_too_large_as_json,
        ))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(TraceLayer::new_for_http().on_failure(
            |error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
                tracing::error!("Server error: {error}");
            },
        ))
}

/// Bodies refused by the request limit get the same reply as any oversized photo.
async fn payload_too_large_as_json(State(max_size): State<u64>, response: Response) -> Response {
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        tracing::info!("request body over limit, photo larger than {max_size} bytes");
        return UploadError::FileTooLarge { max_size }.into_response();
    }
    response
}

/// The upload log and in-flight temporary files live inside the served tree.
async fn hide_private_files(request: Request, next: Next) -> Response {
    let path = request.uri().path();
    // generated names never need escaping
    let hidden = path.contains('%')
        || path
            .split('/')
            .any(|segment| segment == LOG_FILE || segment.starts_with(TEMP_PREFIX));
    if hidden {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
