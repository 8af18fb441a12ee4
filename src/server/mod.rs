//! HTTP surface: upload, OCR, ingest and result endpoints on axum.
//!
//! | Route                          | Body                      | Response                    |
//! |--------------------------------|---------------------------|-----------------------------|
//! | `POST /api/convert-pdf`        | multipart `pdf` / `file`  | `{ images: [dataUri, ...] }` |
//! | `POST /api/extract-text`       | `{ imageData: base64 }`   | `OcrResult`                 |
//! | `POST /api/ingest`             | multipart `pdf` / `file`  | `PipelineRun`               |
//! | `GET/PUT/DELETE /api/results/:imageId` | `OcrResult` (PUT) | `OcrResult` / 204         |
//!
//! Every failure is a JSON body `{ "error": string }` with an HTTP status.
//! A client disconnect drops the handler future, which cancels the run and
//! releases the temporary PDF.

mod handlers;

pub use handlers::{ApiError, ExtractTextRequest, ImagesResponse};

use crate::coordinator::Coordinator;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Largest accepted request body unless configured otherwise.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
        }
    }
}

/// Build the application router.
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/convert-pdf", post(handlers::convert_pdf))
        .route("/api/extract-text", post(handlers::extract_text))
        .route("/api/ingest", post(handlers::ingest))
        .route(
            "/api/results/:image_id",
            get(handlers::get_result)
                .put(handlers::put_result)
                .delete(handlers::delete_result),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: AppState, max_upload_bytes: usize) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, create_router(state, max_upload_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the process is killed.
        std::future::pending::<()>().await;
    }
}
