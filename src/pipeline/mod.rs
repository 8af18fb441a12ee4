//! Pipeline stages for PDF-to-OCR ingestion.
//!
//! Each submodule implements exactly one step and is driven by
//! [`crate::coordinator::Coordinator`].
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ blob ──▶ render ──▶ encode ──▶ ocr ──▶ store
//! (bytes)   (temp)   (pdfium)   (PNG)    (submit+poll) (JSON)
//! ```
//!
//! 1. [`blob`]: park the uploaded bytes in a temp file pdfium can open
//! 2. [`render`]: rasterise pages lazily; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`]: PNG-encode each `DynamicImage`
//! 4. [`ocr`]: submit to the OCR backend and poll with bounded retries;
//!    the only stage with network I/O
//! 5. [`store`]: persist results keyed by image identifier

pub mod blob;
pub mod encode;
pub mod ocr;
pub mod render;
pub mod store;
