//! PDF rasterisation: stream pages of a PDF as PNG [`PageImage`]s via pdfium.
//!
//! ## Why a dedicated blocking task?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not async-safe. All pdfium calls for one document happen on a
//! single `spawn_blocking` thread that renders pages one at a time and hands
//! each over a bounded channel. The channel holds at most one finished page,
//! so a slow consumer pauses rendering instead of piling decoded bitmaps up in
//! memory.
//!
//! The uploaded bytes are written to a [`TempBlob`] on that same thread and
//! owned by it. The blob is released when the thread finishes: after the last
//! page, before a load failure is reported, or as soon as the receiving
//! stream is dropped.

use crate::error::{IngestError, PageError};
use crate::pipeline::blob::{TempBlob, TempBlobStore};
use crate::pipeline::encode::PageImage;
use async_trait::async_trait;
use futures::Stream;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// A boxed stream of rendered pages, in document order.
///
/// Each item carries its own page index; a failed page yields
/// `Err(PageError::RenderFailed)` and the stream moves on to the next page.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<PageImage, PageError>> + Send>>;

/// An opened document: page count up front, pages produced lazily.
pub struct RasterizedPages {
    page_count: usize,
    pages: PageStream,
}

impl RasterizedPages {
    pub fn new(page_count: usize, pages: PageStream) -> Self {
        Self { page_count, pages }
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn into_stream(self) -> PageStream {
        self.pages
    }
}

/// Turns PDF bytes into a lazy sequence of page images.
///
/// The sequence is finite (exactly `page_count` items) and restartable:
/// calling `rasterize` again with the same bytes starts a fresh pass.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Open `pdf` and start producing pages at `scale`.
    ///
    /// # Errors
    /// `IngestError::MalformedInput` when the bytes are not a readable PDF.
    async fn rasterize(&self, pdf: &[u8], scale: f32) -> Result<RasterizedPages, IngestError>;
}

/// Reject inputs that cannot be a PDF before touching pdfium.
pub fn validate_pdf_header(bytes: &[u8]) -> Result<(), IngestError> {
    if bytes.is_empty() {
        return Err(IngestError::MalformedInput {
            detail: "input is empty".into(),
        });
    }
    if !bytes.starts_with(b"%PDF") {
        let magic: Vec<u8> = bytes.iter().take(4).copied().collect();
        return Err(IngestError::MalformedInput {
            detail: format!("missing %PDF header, first bytes: {:?}", magic),
        });
    }
    Ok(())
}

/// pdfium-backed [`Rasterizer`].
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    blobs: TempBlobStore,
    library_path: Option<PathBuf>,
    max_page_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn new(blobs: TempBlobStore) -> Self {
        Self {
            blobs,
            library_path: None,
            max_page_pixels: 6000,
        }
    }

    /// Load libpdfium from this directory instead of the system search path.
    pub fn with_library_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_path = Some(dir.into());
        self
    }

    pub fn with_max_page_pixels(mut self, px: u32) -> Self {
        self.max_page_pixels = px;
        self
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(&self, pdf: &[u8], scale: f32) -> Result<RasterizedPages, IngestError> {
        validate_pdf_header(pdf)?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (page_tx, page_rx) = mpsc::channel(1);
        let blobs = self.blobs.clone();
        let bytes = pdf.to_vec();
        let library_path = self.library_path.clone();
        let max_pixels = self.max_page_pixels;

        tokio::task::spawn_blocking(move || {
            render_worker(
                &blobs,
                bytes,
                library_path.as_deref(),
                scale,
                max_pixels,
                ready_tx,
                page_tx,
            )
        });

        let page_count = ready_rx
            .await
            .map_err(|_| IngestError::Internal("Render task exited before opening the PDF".into()))??;

        if page_count == 0 {
            return Err(IngestError::EmptyDocument);
        }

        info!("PDF opened: {} pages at scale {}", page_count, scale);
        Ok(RasterizedPages::new(
            page_count,
            Box::pin(ReceiverStream::new(page_rx)),
        ))
    }
}

/// Bind to libpdfium, preferring an explicit directory when given.
pub fn bind_pdfium(library_dir: Option<&Path>) -> Result<Pdfium, IngestError> {
    let bindings = match library_dir {
        Some(dir) => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| IngestError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

type ReadySender = oneshot::Sender<Result<usize, IngestError>>;

/// Body of the blocking render thread.
///
/// Open failures are reported only after the blob is gone, so a caller that
/// sees `Err` never finds temp bytes left behind.
fn render_worker(
    blobs: &TempBlobStore,
    pdf: Vec<u8>,
    library_dir: Option<&Path>,
    scale: f32,
    max_pixels: u32,
    ready: ReadySender,
    pages_tx: mpsc::Sender<Result<PageImage, PageError>>,
) {
    let blob = match blobs.acquire(&pdf) {
        Ok(blob) => blob,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    drop(pdf);

    let pdfium = match bind_pdfium(library_dir) {
        Ok(p) => p,
        Err(e) => return fail_open(blob, ready, e),
    };

    let document = match pdfium.load_pdf_from_file(blob.path(), None) {
        Ok(doc) => doc,
        Err(e) => {
            let err = IngestError::MalformedInput {
                detail: format!("{:?}", e),
            };
            return fail_open(blob, ready, err);
        }
    };

    let total_pages = document.pages().len() as usize;
    if ready.send(Ok(total_pages)).is_ok() {
        render_pages(&document, total_pages, scale, max_pixels, &pages_tx);
    }

    drop(document);
    release(blob);
}

fn fail_open(blob: TempBlob, ready: ReadySender, err: IngestError) {
    release(blob);
    let _ = ready.send(Err(err));
}

fn release(blob: TempBlob) {
    if let Err(e) = blob.release() {
        warn!("Failed to remove temp PDF: {}", e);
    }
}

fn render_pages(
    document: &PdfDocument,
    total_pages: usize,
    scale: f32,
    max_pixels: u32,
    pages_tx: &mpsc::Sender<Result<PageImage, PageError>>,
) {
    let pages = document.pages();

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(scale)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    for idx in 0..total_pages {
        let item = match pages.get(idx as u16) {
            Ok(page) => render_page(&page, idx, &render_config, scale),
            Err(e) => Err(PageError::RenderFailed {
                page: idx,
                detail: format!("{:?}", e),
            }),
        };

        if let Err(ref e) = item {
            warn!("{}", e);
        }

        if pages_tx.blocking_send(item).is_err() {
            debug!("Page consumer went away; stopping after page {}", idx);
            return;
        }
    }
}

fn render_page(
    page: &PdfPage,
    idx: usize,
    config: &PdfRenderConfig,
    scale: f32,
) -> Result<PageImage, PageError> {
    let bitmap = page
        .render_with_config(config)
        .map_err(|e| PageError::RenderFailed {
            page: idx,
            detail: format!("{:?}", e),
        })?;

    PageImage::encode(idx, &bitmap.as_image(), scale).map_err(|e| PageError::RenderFailed {
        page: idx,
        detail: format!("PNG encoding failed: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn header_check_rejects_empty_and_non_pdf() {
        assert!(matches!(
            validate_pdf_header(b""),
            Err(IngestError::MalformedInput { .. })
        ));
        let err = validate_pdf_header(b"\x89PNG\r\n").unwrap_err();
        assert!(err.to_string().contains("%PDF"));
        assert!(validate_pdf_header(b"%PDF-1.7\n").is_ok());
    }

    #[tokio::test]
    async fn open_failure_releases_acquired_blob() {
        let dir = TempDir::new().unwrap();
        let blobs = dir.path().join("blobs");
        let rasterizer = PdfiumRasterizer::new(TempBlobStore::in_dir(&blobs))
            .with_library_path(dir.path().join("no-pdfium-here"));

        let result = rasterizer
            .rasterize(b"%PDF-1.7\ngarbage that is not a document", 3.0)
            .await;

        assert!(result.is_err());
        // the blob directory was created, so a blob was really acquired
        assert!(blobs.is_dir());
        assert_eq!(std::fs::read_dir(&blobs).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn non_pdf_is_rejected_before_any_blob_is_written() {
        let dir = TempDir::new().unwrap();
        let rasterizer = PdfiumRasterizer::new(TempBlobStore::in_dir(dir.path()));

        let result = rasterizer.rasterize(b"<html>not a pdf</html>", 3.0).await;

        assert!(matches!(result, Err(IngestError::MalformedInput { .. })));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
