//! Configuration types for the PDF → OCR ingestion pipeline.
//!
//! All pipeline behaviour is controlled through [`IngestConfig`], built via
//! its [`IngestConfigBuilder`]. One struct carries every knob so a config can
//! be shared across page workers, logged, and diffed between runs.

use crate::error::IngestError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for an ingestion run.
///
/// Built via [`IngestConfig::builder()`] or using [`IngestConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdfocr::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .scale(2.0)
///     .concurrency(3)
///     .ocr_endpoint("https://example.cognitiveservices.azure.com")
///     .ocr_api_key("secret")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 3);
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Rasterisation scale factor applied to each page's natural size. Default: 3.0.
    ///
    /// At 3× a US-letter page becomes roughly 1836 × 2376 px, comfortably
    /// inside the Azure Read limits while keeping small print legible.
    pub scale: f32,

    /// Maximum rendered edge in pixels. Default: 6000.
    ///
    /// Caps oversized pages (posters, drawings) independently of `scale` so a
    /// single page cannot exhaust memory or exceed backend image limits.
    pub max_page_pixels: u32,

    /// Number of pages whose OCR operation may be in flight at once. Default: 4.
    ///
    /// OCR backends throttle per subscription; lower this on `429` responses.
    pub concurrency: usize,

    /// Polling behaviour for asynchronous OCR operations.
    pub poll: PollPolicy,

    /// Per-request HTTP timeout for OCR submit/poll calls. Default: 30.
    pub http_timeout_secs: u64,

    /// Skip OCR for pages whose result is already in the result store. Default: true.
    pub reuse_cached_results: bool,

    /// OCR backend location and credential.
    pub ocr: OcrEndpoint,

    /// Directory holding `<imageId>.json` results. Default: `./json`.
    pub results_dir: PathBuf,

    /// Directory containing the pdfium shared library. If None, the
    /// system library search path is used.
    pub pdfium_library_path: Option<PathBuf>,

    /// Directory for temporary PDF copies. If None, the OS temp dir is used.
    pub temp_dir: Option<PathBuf>,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

/// Where the OCR backend lives and how to authenticate.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct OcrEndpoint {
    /// Base URL, e.g. `https://<resource>.cognitiveservices.azure.com`.
    pub endpoint: Option<String>,
    /// Subscription key sent as `Ocp-Apim-Subscription-Key`.
    pub api_key: Option<String>,
}

impl fmt::Debug for OcrEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrEndpoint")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How the OCR client waits for an asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Fixed delay between polls. Default: 1 s.
    pub interval: Duration,
    /// Polls before giving up with a timeout. Default: 60.
    pub max_attempts: u32,
    /// Consecutive transport failures tolerated while polling. Default: 3.
    ///
    /// Retries back off exponentially from `interval`.
    pub transport_retries: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 60,
            transport_retries: 3,
        }
    }
}

impl PollPolicy {
    /// Delay before the next poll after `consecutive_failures` transport errors.
    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.interval;
        }
        let factor = 2u32.saturating_pow(consecutive_failures - 1);
        self.interval.saturating_mul(factor)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            scale: 3.0,
            max_page_pixels: 6000,
            concurrency: 4,
            poll: PollPolicy::default(),
            http_timeout_secs: 30,
            reuse_cached_results: true,
            ocr: OcrEndpoint::default(),
            results_dir: PathBuf::from("json"),
            pdfium_library_path: None,
            temp_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("scale", &self.scale)
            .field("max_page_pixels", &self.max_page_pixels)
            .field("concurrency", &self.concurrency)
            .field("poll", &self.poll)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("reuse_cached_results", &self.reuse_cached_results)
            .field("ocr", &self.ocr)
            .field("results_dir", &self.results_dir)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field("temp_dir", &self.temp_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IngestProgressCallback>"),
            )
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn scale(mut self, scale: f32) -> Self {
        self.config.scale = scale;
        self
    }

    pub fn max_page_pixels(mut self, px: u32) -> Self {
        self.config.max_page_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll.interval = interval;
        self
    }

    pub fn max_poll_attempts(mut self, n: u32) -> Self {
        self.config.poll.max_attempts = n;
        self
    }

    pub fn poll_transport_retries(mut self, n: u32) -> Self {
        self.config.poll.transport_retries = n;
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs;
        self
    }

    pub fn reuse_cached_results(mut self, v: bool) -> Self {
        self.config.reuse_cached_results = v;
        self
    }

    pub fn ocr_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.ocr.endpoint = Some(endpoint.into());
        self
    }

    pub fn ocr_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.ocr.api_key = Some(key.into());
        self
    }

    pub fn results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.results_dir = dir.into();
        self
    }

    pub fn pdfium_library_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(dir.into());
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if !c.scale.is_finite() || c.scale <= 0.0 || c.scale > 10.0 {
            return Err(IngestError::InvalidConfig(format!(
                "Scale must be in (0, 10], got {}",
                c.scale
            )));
        }
        if c.concurrency == 0 {
            return Err(IngestError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.poll.max_attempts == 0 {
            return Err(IngestError::InvalidConfig(
                "Poll attempts must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
