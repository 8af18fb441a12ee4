//! Error types for the edgequake-pdfocr library.
//!
//! Failures fall into three scopes:
//!
//! * [`IngestError`]: **Fatal**: the document cannot be processed at all
//!   (not a PDF, pdfium unavailable, every page failed). Returned as
//!   `Err(IngestError)` from the [`crate::coordinator::Coordinator`] entry points.
//!
//! * [`PageError`]: **Page-scoped**: one page failed to render or OCR.
//!   Stored inside [`crate::output::PageOutcome`] so sibling pages keep their
//!   results and the caller sees exactly which pages failed and why.
//!
//! * [`OcrError`] / [`StoreError`]: component-level errors of the OCR client
//!   and the result store. OCR errors become a [`PageError`] once the
//!   coordinator knows which page they belong to.

use thiserror::Error;

/// All fatal errors returned by the edgequake-pdfocr library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::PageOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded bytes are not a PDF pdfium can open.
    #[error("Malformed PDF input: {detail}")]
    MalformedInput { detail: String },

    /// The PDF opened but contains no pages.
    #[error("PDF contains no pages")]
    EmptyDocument,

    // ── Run outcome errors ────────────────────────────────────────────────
    /// Every page failed; the run produced no OCR data at all.
    #[error("All {total} pages failed.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// Some pages succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::PipelineRun::into_result`] when
    /// the caller wants to treat any page failure as an error.
    #[error("{failed}/{total} pages failed during OCR")]
    PartialFailure {
        succeeded: usize,
        failed: usize,
        total: usize,
    },

    /// The run was cancelled before it completed.
    #[error("Pipeline run was cancelled")]
    Cancelled,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No OCR backend endpoint or credential was supplied.
    #[error("OCR backend is not configured.\n{hint}")]
    OcrNotConfigured { hint: String },

    // ── Pdfium / storage errors ───────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/dir-containing-libpdfium or install libpdfium\n\
system-wide so the dynamic loader can find it.\n"
    )]
    PdfiumBindingFailed(String),

    /// The temporary holding file for the uploaded PDF could not be written.
    #[error("Temporary PDF storage failed: {source}")]
    TempStorage {
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// `page` is always the 0-based page index. The overall run continues
/// unless every page fails.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageError {
    /// Page rasterisation or PNG encoding failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The OCR backend refused or never received the image.
    #[error("Page {page}: OCR submission failed: {detail}")]
    OcrSubmission { page: usize, detail: String },

    /// Polling kept failing at the transport level.
    #[error("Page {page}: OCR polling failed after {retries} retries: {detail}")]
    OcrPoll {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// The backend reached a terminal status other than `succeeded`.
    #[error("Page {page}: OCR backend reported failure: {reason}")]
    OcrBackend { page: usize, reason: String },

    /// The operation never reached a terminal status.
    #[error("Page {page}: OCR timed out after {attempts} polls ({waited_ms}ms)")]
    Timeout {
        page: usize,
        attempts: u32,
        waited_ms: u64,
    },

    /// The backend answered with JSON that does not match the read schema.
    #[error("Page {page}: invalid OCR response: {detail}")]
    InvalidResponse { page: usize, detail: String },

    /// OCR succeeded but the result could not be stored.
    #[error("Page {page}: storing OCR result failed: {detail}")]
    Persist { page: usize, detail: String },
}

impl PageError {
    /// The 0-based index of the page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::OcrSubmission { page, .. }
            | PageError::OcrPoll { page, .. }
            | PageError::OcrBackend { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::InvalidResponse { page, .. }
            | PageError::Persist { page, .. } => *page,
        }
    }
}

/// Errors raised by an [`crate::pipeline::ocr::OcrClient`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OcrError {
    /// Transport failure or non-2xx status while submitting the image.
    #[error("submission failed: {detail}")]
    Submission { detail: String },

    /// Transport failure or non-2xx status while polling.
    #[error("poll failed after {retries} retries: {detail}")]
    Poll { retries: u32, detail: String },

    /// Terminal status other than `succeeded`.
    #[error("backend reported failure: {reason}")]
    Backend { reason: String },

    /// Still running after the configured number of polls.
    #[error("timed out after {attempts} polls ({waited_ms}ms)")]
    Timeout { attempts: u32, waited_ms: u64 },

    /// Response body failed schema validation.
    #[error("invalid response: {detail}")]
    InvalidResponse { detail: String },
}

impl OcrError {
    /// Attach the page index this error occurred on.
    pub fn at_page(self, page: usize) -> PageError {
        match self {
            OcrError::Submission { detail } => PageError::OcrSubmission { page, detail },
            OcrError::Poll { retries, detail } => PageError::OcrPoll {
                page,
                retries,
                detail,
            },
            OcrError::Backend { reason } => PageError::OcrBackend { page, reason },
            OcrError::Timeout {
                attempts,
                waited_ms,
            } => PageError::Timeout {
                page,
                attempts,
                waited_ms,
            },
            OcrError::InvalidResponse { detail } => PageError::InvalidResponse { page, detail },
        }
    }
}

/// Errors raised by a [`crate::pipeline::store::ResultStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No result has been stored under this identifier.
    #[error("No OCR result stored for '{image_id}'")]
    NotFound { image_id: String },

    /// The identifier cannot be mapped to a storage key.
    #[error("Invalid image identifier '{image_id}'")]
    InvalidKey { image_id: String },

    /// Reading or writing the backing file failed.
    #[error("I/O error for '{image_id}': {source}")]
    Io {
        image_id: String,
        #[source]
        source: std::io::Error,
    },

    /// The stored JSON could not be decoded.
    #[error("Stored result for '{image_id}' is corrupt: {detail}")]
    Corrupt { image_id: String, detail: String },
}

impl StoreError {
    /// `true` for the "not yet processed" outcome, as opposed to a real failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
