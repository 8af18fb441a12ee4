//! Progress-callback trait for per-page pipeline events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive
//! events as the coordinator moves each page through its state machine.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfocr::{IngestConfig, IngestProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl IngestProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, index: usize, total_pages: usize, regions: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} regions)", index + 1, total_pages, regions);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = IngestConfig::builder()
//!     .progress_callback(counter as Arc<dyn IngestProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::PageState;
use std::sync::Arc;

/// Called by the coordinator as it processes each page.
///
/// Pages are processed concurrently, so every method may be called from
/// several tasks at once. Implementations must protect shared mutable state
/// (e.g. `Mutex`, `AtomicUsize`). All methods default to no-ops.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once after rasterisation reports the page count.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called on every page state transition.
    ///
    /// # Arguments
    /// * `index`: 0-based page index
    /// * `state`: the state the page just entered
    fn on_page_state(&self, index: usize, state: PageState) {
        let _ = (index, state);
    }

    /// Called when a page reaches `succeeded`.
    ///
    /// # Arguments
    /// * `index`: 0-based page index
    /// * `total_pages`: pages in the document
    /// * `regions`: number of recognised text regions
    fn on_page_complete(&self, index: usize, total_pages: usize, regions: usize) {
        let _ = (index, total_pages, regions);
    }

    /// Called when a page reaches `failed`.
    fn on_page_error(&self, index: usize, total_pages: usize, error: &str) {
        let _ = (index, total_pages, error);
    }

    /// Called once after every page has reached a terminal state.
    fn on_run_complete(&self, total_pages: usize, succeeded: usize) {
        let _ = (total_pages, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;
