//! OCR client: submit a page image to an asynchronous OCR backend and poll
//! until the operation reaches a terminal status.
//!
//! ## Polling policy
//!
//! Backends such as Azure Read answer a submission with an operation URL and
//! no result. [`poll_until_done`] polls that URL at a fixed interval and
//! gives up after [`PollPolicy::max_attempts`] polls with
//! [`OcrError::Timeout`], so a wedged operation costs a bounded amount of
//! time. Transport failures while polling are retried with exponential
//! backoff up to [`PollPolicy::transport_retries`] consecutive times; a
//! failure at submission time is returned immediately.
//!
//! ## Schema boundary
//!
//! Backend JSON is deserialised into private wire structs and validated
//! (bounding boxes must have 4 or 8 values) before conversion into
//! [`OcrResult`]. Nothing past this module handles untyped JSON.

use crate::config::PollPolicy;
use crate::error::OcrError;
use crate::output::{BoundingBox, OcrRegion, OcrResult, OcrStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Reference to a running backend operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle(pub String);

impl OperationHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Non-terminal status reported while an operation is still working.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    NotStarted,
    Running,
}

/// Outcome of a single poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Keep polling.
    Pending(Pending),
    /// Terminal: `result.status` says whether it succeeded.
    Done(OcrResult),
}

/// An asynchronous OCR backend.
#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Submit image bytes; returns the handle to poll.
    ///
    /// Errors are always [`OcrError::Submission`] or [`OcrError::InvalidResponse`].
    async fn submit(&self, image: &[u8]) -> Result<OperationHandle, OcrError>;

    /// Ask once for the operation's status.
    ///
    /// Transport failures are reported as [`OcrError::Poll`] with `retries: 0`;
    /// the retry budget is applied by [`poll_until_done`].
    async fn poll(&self, handle: &OperationHandle) -> Result<PollStatus, OcrError>;
}

/// Successful completion of a poll loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognized {
    pub result: OcrResult,
    /// Poll requests issued, including failed ones.
    pub attempts: u32,
}

/// Poll `handle` until a terminal status, a non-retryable error, or timeout.
///
/// A terminal `failed` status becomes [`OcrError::Backend`] carrying the
/// backend's reason.
pub async fn poll_until_done(
    client: &dyn OcrClient,
    handle: &OperationHandle,
    policy: &PollPolicy,
) -> Result<Recognized, OcrError> {
    let start = Instant::now();
    let mut consecutive_failures = 0u32;

    for attempt in 1..=policy.max_attempts {
        match client.poll(handle).await {
            Ok(PollStatus::Done(result)) => {
                debug!(
                    "Operation {} finished after {} polls ({:?})",
                    handle.as_str(),
                    attempt,
                    result.status
                );
                return match result.status {
                    OcrStatus::Succeeded => Ok(Recognized { result, attempts: attempt }),
                    OcrStatus::Failed => Err(OcrError::Backend {
                        reason: result
                            .error
                            .unwrap_or_else(|| "operation status 'failed'".to_string()),
                    }),
                };
            }
            Ok(PollStatus::Pending(status)) => {
                consecutive_failures = 0;
                debug!("Operation {}: {:?} (poll {})", handle.as_str(), status, attempt);
            }
            Err(OcrError::Poll { detail, .. }) => {
                consecutive_failures += 1;
                if consecutive_failures > policy.transport_retries {
                    return Err(OcrError::Poll {
                        retries: policy.transport_retries,
                        detail,
                    });
                }
                warn!(
                    "Operation {}: poll retry {}/{}: {}",
                    handle.as_str(),
                    consecutive_failures,
                    policy.transport_retries,
                    detail
                );
            }
            Err(other) => return Err(other),
        }

        if attempt < policy.max_attempts {
            sleep(policy.backoff(consecutive_failures)).await;
        }
    }

    Err(OcrError::Timeout {
        attempts: policy.max_attempts,
        waited_ms: start.elapsed().as_millis() as u64,
    })
}

/// Submit then poll: the whole OCR round-trip for one image.
pub async fn recognize(
    client: &dyn OcrClient,
    image: &[u8],
    policy: &PollPolicy,
) -> Result<Recognized, OcrError> {
    let handle = client.submit(image).await?;
    poll_until_done(client, &handle, policy).await
}

// ── Azure Read (Computer Vision v3.2) ────────────────────────────────────

const ANALYZE_PATH: &str = "/vision/v3.2/read/analyze";
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION: &str = "Operation-Location";

/// [`OcrClient`] for the Azure Computer Vision Read API.
#[derive(Debug, Clone)]
pub struct AzureReadClient {
    http: reqwest::Client,
    analyze_url: String,
    api_key: String,
}

impl AzureReadClient {
    /// `endpoint` is the resource base URL, with or without a trailing slash.
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, OcrError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OcrError::Submission {
                detail: format!("HTTP client: {}", e),
            })?;
        Ok(Self {
            http,
            analyze_url: format!("{}{}", endpoint.trim_end_matches('/'), ANALYZE_PATH),
            api_key: api_key.into(),
        })
    }

    pub fn analyze_url(&self) -> &str {
        &self.analyze_url
    }
}

#[async_trait]
impl OcrClient for AzureReadClient {
    async fn submit(&self, image: &[u8]) -> Result<OperationHandle, OcrError> {
        let response = self
            .http
            .post(&self.analyze_url)
            .header(KEY_HEADER, &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| OcrError::Submission {
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Submission {
                detail: format!("HTTP {}: {}", status, truncate(&body, 200)),
            });
        }

        let location = response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| OcrError::InvalidResponse {
                detail: format!("{} header missing from submit response", OPERATION_LOCATION),
            })?;

        info!("Submitted {} bytes → {}", image.len(), location);
        Ok(OperationHandle(location.to_string()))
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<PollStatus, OcrError> {
        let response = self
            .http
            .get(handle.as_str())
            .header(KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| OcrError::Poll {
                retries: 0,
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OcrError::Poll {
                retries: 0,
                detail: format!("HTTP {}", status),
            });
        }

        let body = response.bytes().await.map_err(|e| OcrError::Poll {
            retries: 0,
            detail: e.to_string(),
        })?;
        parse_read_operation(&body)
    }
}

/// Validate a poll response body and convert it to a [`PollStatus`].
pub fn parse_read_operation(body: &[u8]) -> Result<PollStatus, OcrError> {
    let op: wire::ReadOperation =
        serde_json::from_slice(body).map_err(|e| OcrError::InvalidResponse {
            detail: e.to_string(),
        })?;
    op.into_poll_status()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

mod wire {
    //! JSON shapes of the Read API. Private to the OCR boundary.

    use super::*;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum Status {
        NotStarted,
        Running,
        Succeeded,
        Failed,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ReadOperation {
        pub status: Status,
        #[serde(default)]
        pub analyze_result: Option<AnalyzeResult>,
        #[serde(default)]
        pub error: Option<ErrorBody>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct AnalyzeResult {
        #[serde(default)]
        pub read_results: Vec<ReadResult>,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct ReadResult {
        #[serde(default)]
        pub width: Option<f64>,
        #[serde(default)]
        pub height: Option<f64>,
        #[serde(default)]
        pub lines: Vec<Line>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Line {
        pub bounding_box: Vec<f64>,
        pub text: String,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct ErrorBody {
        #[serde(default)]
        pub code: Option<String>,
        #[serde(default)]
        pub message: Option<String>,
    }

    impl ReadOperation {
        pub(super) fn into_poll_status(self) -> Result<PollStatus, OcrError> {
            match self.status {
                Status::NotStarted => Ok(PollStatus::Pending(Pending::NotStarted)),
                Status::Running => Ok(PollStatus::Pending(Pending::Running)),
                Status::Failed => {
                    let reason = match self.error {
                        Some(ErrorBody {
                            code: Some(code),
                            message: Some(message),
                        }) => format!("{}: {}", code, message),
                        Some(ErrorBody {
                            message: Some(message),
                            ..
                        }) => message,
                        Some(ErrorBody {
                            code: Some(code), ..
                        }) => code,
                        _ => "operation status 'failed'".to_string(),
                    };
                    Ok(PollStatus::Done(OcrResult::failed(reason)))
                }
                Status::Succeeded => {
                    let analyze = self.analyze_result.ok_or_else(|| OcrError::InvalidResponse {
                        detail: "status 'succeeded' without analyzeResult".into(),
                    })?;
                    let mut result = OcrResult::succeeded(Vec::new());
                    for page in analyze.read_results {
                        if result.width.is_none() {
                            result.width = page.width;
                            result.height = page.height;
                        }
                        for line in page.lines {
                            let bounding_box = BoundingBox::try_from(line.bounding_box)
                                .map_err(|detail| OcrError::InvalidResponse { detail })?;
                            result.regions.push(OcrRegion {
                                bounding_box,
                                text: line.text,
                            });
                        }
                    }
                    Ok(PollStatus::Done(result))
                }
            }
        }
    }
}
