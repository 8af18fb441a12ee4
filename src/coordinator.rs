//! Page pipeline coordinator: Document → [`PipelineRun`].
//!
//! ## Flow
//!
//! 1. Rasterise the document. A failure here (not a PDF, no pages, pdfium
//!    missing) is fatal and returned as `Err`.
//! 2. Pull pages from the lazy page stream and run each through
//!    `cache lookup → submit → poll → store` on a bounded worker pool
//!    (`buffer_unordered(concurrency)`). The render thread only produces the
//!    next page when a worker slot frees up.
//! 3. Reassemble outcomes by page index. Page failures stay inside their
//!    [`PageOutcome`]; the run fails only when no page succeeded.
//!
//! Dropping the returned future (or using [`Coordinator::run_until`]) stops
//! rendering, abandons in-flight OCR operations and releases the temp PDF.

use crate::config::{IngestConfig, PollPolicy};
use crate::document::{page_image_id, Document};
use crate::error::{IngestError, OcrError, PageError};
use crate::output::{OcrResult, OcrStatus, PageOutcome, PageState, PipelineRun, RunStats};
use crate::pipeline::blob::TempBlobStore;
use crate::pipeline::encode::PageImage;
use crate::pipeline::ocr::{self, AzureReadClient, OcrClient, Recognized};
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::store::{FsResultStore, ResultStore};
use crate::progress::{IngestProgressCallback, ProgressCallback};
use futures::stream::{Stream, StreamExt, TryStreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Page outcomes in completion order.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = PageOutcome> + Send>>;

/// Drives documents through rasterisation, OCR and storage.
///
/// Cheap to share behind an `Arc`; a single coordinator can serve many
/// concurrent runs because every run owns its own page slots.
pub struct Coordinator {
    config: IngestConfig,
    rasterizer: Arc<dyn Rasterizer>,
    ocr: Arc<dyn OcrClient>,
    store: Option<Arc<dyn ResultStore>>,
}

impl Coordinator {
    /// Assemble a coordinator from pre-built components.
    ///
    /// No result store is attached; use [`Coordinator::with_store`].
    pub fn new(
        config: IngestConfig,
        rasterizer: Arc<dyn Rasterizer>,
        ocr: Arc<dyn OcrClient>,
    ) -> Self {
        Self {
            config,
            rasterizer,
            ocr,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the production stack: pdfium, Azure Read, and a filesystem store
    /// under `config.results_dir`.
    ///
    /// # Errors
    /// `IngestError::OcrNotConfigured` when the endpoint or key is missing.
    pub fn from_config(config: IngestConfig) -> Result<Self, IngestError> {
        let endpoint = config
            .ocr
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| IngestError::OcrNotConfigured {
                hint: "Set AZURE_COMPUTER_VISION_ENDPOINT or pass --endpoint.".into(),
            })?;
        let api_key = config
            .ocr
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| IngestError::OcrNotConfigured {
                hint: "Set AZURE_COMPUTER_VISION_SUBSCRIPTION_KEY or pass --key.".into(),
            })?;

        let ocr = AzureReadClient::new(
            endpoint,
            api_key,
            Duration::from_secs(config.http_timeout_secs),
        )
        .map_err(|e| IngestError::InvalidConfig(e.to_string()))?;

        let blobs = match &config.temp_dir {
            Some(dir) => TempBlobStore::in_dir(dir),
            None => TempBlobStore::new(),
        };
        let mut rasterizer =
            PdfiumRasterizer::new(blobs).with_max_page_pixels(config.max_page_pixels);
        if let Some(dir) = &config.pdfium_library_path {
            rasterizer = rasterizer.with_library_path(dir);
        }

        let store = FsResultStore::new(&config.results_dir);
        info!(
            "OCR backend {} | results in {}",
            ocr.analyze_url(),
            store.root().display()
        );

        Ok(Self::new(config, Arc::new(rasterizer), Arc::new(ocr)).with_store(Arc::new(store)))
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&Arc<dyn ResultStore>> {
        self.store.as_ref()
    }

    /// Run every page of `doc` through OCR and collect the outcomes.
    ///
    /// Returns `Ok` when at least one page succeeded, even if others failed
    /// (check [`PipelineRun::failures`]).
    ///
    /// # Errors
    /// - rasterisation errors (`MalformedInput`, `EmptyDocument`, ...)
    /// - `AllPagesFailed` when no page produced a result
    pub async fn run(&self, doc: &Document) -> Result<PipelineRun, IngestError> {
        let started = Instant::now();
        let (page_count, mut outcomes) = self.start(doc).await?;

        // One slot per page; each worker's outcome lands in its own slot.
        let mut slots: Vec<Option<PageOutcome>> = vec![None; page_count];
        while let Some(outcome) = outcomes.next().await {
            match slots.get_mut(outcome.index) {
                Some(slot) => *slot = Some(outcome),
                None => warn!(
                    "Dropping outcome for page {} of a {}-page document",
                    outcome.index, page_count
                ),
            }
        }

        let pages: Vec<PageOutcome> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    PageOutcome::failed(
                        PageError::RenderFailed {
                            page: index,
                            detail: "rasterizer produced no image for this page".into(),
                        },
                        None,
                        0,
                    )
                })
            })
            .collect();

        let stats = summarize(&pages, started.elapsed());
        if let Some(cb) = &self.config.progress_callback {
            cb.on_run_complete(page_count, stats.succeeded_pages);
        }

        if stats.succeeded_pages == 0 {
            let first_error = pages
                .iter()
                .find_map(|p| p.error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(IngestError::AllPagesFailed {
                total: page_count,
                first_error,
            });
        }

        info!(
            "Run '{}' complete: {}/{} pages ({} cached, {} failed), {}ms",
            doc.name(),
            stats.succeeded_pages,
            page_count,
            stats.cached_pages,
            stats.failed_pages,
            stats.total_duration_ms
        );

        Ok(PipelineRun {
            document_id: doc.id(),
            document_name: doc.name().to_string(),
            page_count,
            pages,
            stats,
        })
    }

    /// [`run`](Self::run), abandoned as soon as `cancel` resolves.
    ///
    /// On cancellation the page stream is dropped, which stops the render
    /// thread and releases the temporary PDF. Operations already submitted
    /// to the OCR backend are left to expire there.
    pub async fn run_until<F>(&self, doc: &Document, cancel: F) -> Result<PipelineRun, IngestError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            run = self.run(doc) => run,
            _ = cancel => {
                warn!("Run '{}' cancelled", doc.name());
                Err(IngestError::Cancelled)
            }
        }
    }

    /// Stream page outcomes as they complete (not in page order).
    ///
    /// Same concurrency bound as [`run`](Self::run). Failed pages are
    /// yielded as outcomes with `state == Failed`; the all-pages-failed check
    /// is left to the caller.
    pub async fn stream(&self, doc: &Document) -> Result<OutcomeStream, IngestError> {
        let (_, outcomes) = self.start(doc).await?;
        Ok(outcomes)
    }

    /// Rasterise every page without running OCR, in page order.
    ///
    /// Any page that fails to render fails the whole call with
    /// `MalformedInput`.
    pub async fn rasterize_pages(&self, doc: &Document) -> Result<Vec<PageImage>, IngestError> {
        let pages = self
            .rasterizer
            .rasterize(doc.bytes(), self.config.scale)
            .await?;
        let mut images: Vec<PageImage> = pages
            .into_stream()
            .map_err(|e| IngestError::MalformedInput {
                detail: e.to_string(),
            })
            .try_collect()
            .await?;
        images.sort_by_key(|p| p.index);
        Ok(images)
    }

    /// Rasterise and return `data:image/png;base64,...` URIs in page order.
    pub async fn rasterize_data_uris(&self, doc: &Document) -> Result<Vec<String>, IngestError> {
        let images = self.rasterize_pages(doc).await?;
        Ok(images.iter().map(PageImage::to_data_uri).collect())
    }

    /// OCR a single image outside of any document run.
    pub async fn recognize_image(&self, image: &[u8]) -> Result<OcrResult, OcrError> {
        ocr::recognize(self.ocr.as_ref(), image, &self.config.poll)
            .await
            .map(|r| r.result)
    }

    async fn start(&self, doc: &Document) -> Result<(usize, OutcomeStream), IngestError> {
        info!(
            "Starting run '{}' ({} bytes, scale {}, concurrency {})",
            doc.name(),
            doc.len(),
            self.config.scale,
            self.config.concurrency
        );

        let pages = self
            .rasterizer
            .rasterize(doc.bytes(), self.config.scale)
            .await?;
        let page_count = pages.page_count();

        if let Some(cb) = &self.config.progress_callback {
            cb.on_run_start(page_count);
        }

        let worker = PageWorker {
            ocr: Arc::clone(&self.ocr),
            store: self.store.clone(),
            policy: self.config.poll,
            reuse_cached: self.config.reuse_cached_results,
            progress: self.config.progress_callback.clone(),
            document_name: Arc::from(doc.name()),
            fingerprint: Arc::from(doc.fingerprint(self.config.scale)),
            total_pages: page_count,
        };

        let outcomes = pages
            .into_stream()
            .map(move |item| {
                let worker = worker.clone();
                async move { worker.process(item).await }
            })
            .buffer_unordered(self.config.concurrency);

        Ok((page_count, Box::pin(outcomes)))
    }
}

/// Everything a page needs, detached from the coordinator's lifetime.
#[derive(Clone)]
struct PageWorker {
    ocr: Arc<dyn OcrClient>,
    store: Option<Arc<dyn ResultStore>>,
    policy: PollPolicy,
    reuse_cached: bool,
    progress: Option<ProgressCallback>,
    document_name: Arc<str>,
    fingerprint: Arc<str>,
    total_pages: usize,
}

impl PageWorker {
    async fn process(&self, item: Result<PageImage, PageError>) -> PageOutcome {
        let started = Instant::now();

        let image = match item {
            Ok(image) => image,
            Err(e) => {
                self.tracker(e.page()).fail(&e);
                return PageOutcome::failed(e, None, elapsed_ms(started));
            }
        };

        let index = image.index;
        let mut tracker = self.tracker(index);
        tracker.advance(PageState::Rasterized);

        let image_id = page_image_id(&self.document_name, index);
        let info = image.info(image_id.as_str());

        if let Some(result) = self.cached(&image_id).await {
            tracker.succeed(result.regions.len());
            return PageOutcome {
                index,
                state: PageState::Succeeded,
                image: Some(info),
                result: Some(result),
                error: None,
                cached: true,
                poll_attempts: 0,
                duration_ms: elapsed_ms(started),
            };
        }

        match self.recognize(&mut tracker, &image, &image_id).await {
            Ok(Recognized { result, attempts }) => {
                tracker.succeed(result.regions.len());
                PageOutcome {
                    index,
                    state: PageState::Succeeded,
                    image: Some(info),
                    result: Some(result),
                    error: None,
                    cached: false,
                    poll_attempts: attempts,
                    duration_ms: elapsed_ms(started),
                }
            }
            Err(e) => {
                tracker.fail(&e);
                PageOutcome::failed(e, Some(info), elapsed_ms(started))
            }
        }
    }

    async fn recognize(
        &self,
        tracker: &mut PageTracker<'_>,
        image: &PageImage,
        image_id: &str,
    ) -> Result<Recognized, PageError> {
        let index = image.index;

        let handle = self
            .ocr
            .submit(&image.png)
            .await
            .map_err(|e| e.at_page(index))?;
        tracker.advance(PageState::OcrSubmitted);

        tracker.advance(PageState::OcrPolling);
        let mut recognized = ocr::poll_until_done(self.ocr.as_ref(), &handle, &self.policy)
            .await
            .map_err(|e| e.at_page(index))?;
        recognized.result.source = Some(self.fingerprint.to_string());

        if let Some(store) = &self.store {
            store
                .put(image_id, &recognized.result)
                .await
                .map_err(|e| PageError::Persist {
                    page: index,
                    detail: e.to_string(),
                })?;
        }

        Ok(recognized)
    }

    /// A stored successful result read from this same document, if reuse is
    /// enabled.
    async fn cached(&self, image_id: &str) -> Option<OcrResult> {
        if !self.reuse_cached {
            return None;
        }
        let store = self.store.as_ref()?;
        match store.find(image_id).await {
            Ok(Some(result))
                if result.status == OcrStatus::Succeeded
                    && result.source.as_deref() == Some(&*self.fingerprint) =>
            {
                debug!("Reusing stored result for {}", image_id);
                Some(result)
            }
            Ok(Some(_)) => {
                debug!("Stored result for {} is from another document", image_id);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Result lookup for {} failed, running OCR: {}", image_id, e);
                None
            }
        }
    }

    fn tracker(&self, index: usize) -> PageTracker<'_> {
        PageTracker {
            index,
            total_pages: self.total_pages,
            state: PageState::Pending,
            progress: self.progress.as_deref(),
        }
    }
}

/// Enforces the page state machine and forwards transitions to the callback.
struct PageTracker<'a> {
    index: usize,
    total_pages: usize,
    state: PageState,
    progress: Option<&'a dyn IngestProgressCallback>,
}

impl PageTracker<'_> {
    fn advance(&mut self, next: PageState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal page transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("Page {}: {:?} -> {:?}", self.index, self.state, next);
        self.state = next;
        if let Some(cb) = self.progress {
            cb.on_page_state(self.index, next);
        }
    }

    fn succeed(&mut self, regions: usize) {
        self.advance(PageState::Succeeded);
        if let Some(cb) = self.progress {
            cb.on_page_complete(self.index, self.total_pages, regions);
        }
    }

    fn fail(&mut self, error: &PageError) {
        warn!("{}", error);
        self.advance(PageState::Failed);
        if let Some(cb) = self.progress {
            cb.on_page_error(self.index, self.total_pages, &error.to_string());
        }
    }
}

fn summarize(pages: &[PageOutcome], elapsed: Duration) -> RunStats {
    RunStats {
        total_pages: pages.len(),
        succeeded_pages: pages.iter().filter(|p| p.is_success()).count(),
        failed_pages: pages.iter().filter(|p| !p.is_success()).count(),
        cached_pages: pages.iter().filter(|p| p.cached).count(),
        total_regions: pages
            .iter()
            .filter_map(|p| p.result.as_ref())
            .map(|r| r.regions.len())
            .sum(),
        total_duration_ms: elapsed.as_millis() as u64,
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
