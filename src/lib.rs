//! # edgequake-pdfocr
//!
//! Rasterise PDF documents and run asynchronous OCR on every page, keeping
//! per-page bounding-box text results in a queryable store.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Blob     park the upload in a temp file (always released)
//!  ├─ 2. Render   rasterise pages lazily via pdfium (spawn_blocking)
//!  ├─ 3. Encode   PNG per page, index carried alongside
//!  ├─ 4. OCR      submit + bounded poll, at most `concurrency` pages in flight
//!  ├─ 5. Store    `<name>_page_<n>.json`, reused on the next run
//!  └─ 6. Output   PipelineRun: per-page state, result or error
//! ```
//!
//! A page failure never aborts its siblings. A run fails only when the PDF
//! cannot be rasterised or when every page fails.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfocr::{Coordinator, Document, IngestConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::builder()
//!         .ocr_endpoint(std::env::var("AZURE_COMPUTER_VISION_ENDPOINT")?)
//!         .ocr_api_key(std::env::var("AZURE_COMPUTER_VISION_SUBSCRIPTION_KEY")?)
//!         .build()?;
//!     let coordinator = Coordinator::from_config(config)?;
//!
//!     let doc = Document::named("invoice.pdf", std::fs::read("invoice.pdf")?);
//!     let run = coordinator.run(&doc).await?;
//!
//!     for page in run.succeeded() {
//!         println!("page {}: {}", page.index + 1, page.result.as_ref().unwrap().text());
//!     }
//!     for (index, error) in run.failures() {
//!         eprintln!("page {} failed: {}", index + 1, error);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | axum HTTP endpoints ([`server`]) |
//! | `cli`    | on      | The `pdfocr` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Library-only use:
//! ```toml
//! edgequake-pdfocr = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder, OcrEndpoint, PollPolicy};
pub use coordinator::{Coordinator, OutcomeStream};
pub use document::Document;
pub use error::{IngestError, OcrError, PageError, StoreError};
pub use output::{
    BoundingBox, ImageInfo, OcrRegion, OcrResult, OcrStatus, PageOutcome, PageState, PipelineRun,
    RunStats,
};
pub use pipeline::blob::{TempBlob, TempBlobStore};
pub use pipeline::encode::PageImage;
pub use pipeline::ocr::{AzureReadClient, OcrClient, OperationHandle, PollStatus};
pub use pipeline::render::{PdfiumRasterizer, RasterizedPages, Rasterizer};
pub use pipeline::store::{FsResultStore, MemoryResultStore, ResultStore};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
