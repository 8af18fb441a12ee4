//! Typed results: OCR regions, per-page outcomes, and the run aggregate.
//!
//! Nothing in here knows about HTTP or JSON wire shapes; backend responses are
//! validated and converted into these types at the OCR client boundary.

use crate::error::{IngestError, PageError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── OCR result model ─────────────────────────────────────────────────────

/// Terminal status of an OCR operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OcrStatus {
    Succeeded,
    Failed,
}

/// Coordinates delimiting a recognised text region, in image pixels.
///
/// Either 4 values, `[left, top, width, height]`, or 8 values, the four
/// corner points `[x1, y1, x2, y2, x3, y3, x4, y4]` clockwise from top-left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct BoundingBox(Vec<f64>);

impl TryFrom<Vec<f64>> for BoundingBox {
    type Error = String;

    fn try_from(coords: Vec<f64>) -> Result<Self, Self::Error> {
        if coords.len() != 4 && coords.len() != 8 {
            return Err(format!(
                "bounding box must have 4 or 8 values, got {}",
                coords.len()
            ));
        }
        if coords.iter().any(|c| !c.is_finite()) {
            return Err("bounding box contains a non-finite value".to_string());
        }
        Ok(Self(coords))
    }
}

impl From<BoundingBox> for Vec<f64> {
    fn from(b: BoundingBox) -> Self {
        b.0
    }
}

impl BoundingBox {
    pub fn coords(&self) -> &[f64] {
        &self.0
    }

    /// Axis-aligned envelope as `(left, top, right, bottom)`.
    pub fn rect(&self) -> (f64, f64, f64, f64) {
        let c = &self.0;
        if c.len() == 4 {
            return (c[0], c[1], c[0] + c[2], c[1] + c[3]);
        }
        let xs = [c[0], c[2], c[4], c[6]];
        let ys = [c[1], c[3], c[5], c[7]];
        let fold_min = |v: [f64; 4]| v.into_iter().fold(f64::INFINITY, f64::min);
        let fold_max = |v: [f64; 4]| v.into_iter().fold(f64::NEG_INFINITY, f64::max);
        (fold_min(xs), fold_min(ys), fold_max(xs), fold_max(ys))
    }

    pub fn center(&self) -> (f64, f64) {
        let (l, t, r, b) = self.rect();
        ((l + r) / 2.0, (t + b) / 2.0)
    }

    /// `true` when the box center lies inside (or on) the given circle.
    pub fn center_within(&self, x: f64, y: f64, radius: f64) -> bool {
        let (cx, cy) = self.center();
        (cx - x).hypot(cy - y) <= radius
    }
}

/// One recognised line of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrRegion {
    pub bounding_box: BoundingBox,
    pub text: String,
}

/// Structured OCR output for one page image.
///
/// A `Succeeded` result with zero regions is a blank page, which is different
/// from "no result stored" ([`crate::error::StoreError::NotFound`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub status: OcrStatus,
    /// Width of the analysed image as reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default)]
    pub regions: Vec<OcrRegion>,
    /// Backend-supplied reason when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// [`crate::Document::fingerprint`] of the pages this result was read
    /// from. Results without one are never reused by the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl OcrResult {
    pub fn succeeded(regions: Vec<OcrRegion>) -> Self {
        Self {
            status: OcrStatus::Succeeded,
            width: None,
            height: None,
            regions,
            error: None,
            source: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: OcrStatus::Failed,
            width: None,
            height: None,
            regions: Vec::new(),
            error: Some(reason.into()),
            source: None,
        }
    }

    pub fn with_source(mut self, fingerprint: impl Into<String>) -> Self {
        self.source = Some(fingerprint.into());
        self
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// All region text joined with newlines, in backend reading order.
    pub fn text(&self) -> String {
        self.regions
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Regions whose box center lies within `radius` of `(x, y)`.
    pub fn regions_near(&self, x: f64, y: f64, radius: f64) -> Vec<&OcrRegion> {
        self.regions
            .iter()
            .filter(|r| r.bounding_box.center_within(x, y, radius))
            .collect()
    }
}

// ── Page state machine ───────────────────────────────────────────────────

/// Lifecycle of one page inside a run.
///
/// `pending → rasterized → ocrSubmitted → ocrPolling → {succeeded | failed}`.
/// A page may fail from any non-terminal state, and a page served from the
/// result store jumps from `rasterized` straight to `succeeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageState {
    Pending,
    Rasterized,
    OcrSubmitted,
    OcrPolling,
    Succeeded,
    Failed,
}

impl PageState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: PageState) -> bool {
        use PageState::*;
        match (self, next) {
            (Succeeded | Failed, _) => false,
            (_, Failed) => true,
            (Pending, Rasterized) => true,
            (Rasterized, OcrSubmitted) | (Rasterized, Succeeded) => true,
            (OcrSubmitted, OcrPolling) => true,
            (OcrPolling, Succeeded) => true,
            _ => false,
        }
    }
}

// ── Per-page outcome and run aggregate ───────────────────────────────────

/// Rendering metadata for a page image (the PNG bytes themselves are not kept).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    pub image_id: String,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub png_bytes: usize,
}

/// Terminal record for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageOutcome {
    /// 0-based page index.
    pub index: usize,
    pub state: PageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<OcrResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
    /// Served from the result store without calling the OCR backend.
    #[serde(default)]
    pub cached: bool,
    /// Number of poll requests issued for this page.
    #[serde(default)]
    pub poll_attempts: u32,
    pub duration_ms: u64,
}

impl PageOutcome {
    pub fn is_success(&self) -> bool {
        self.state == PageState::Succeeded
    }

    /// Outcome for a page that failed before producing any result.
    pub fn failed(error: PageError, image: Option<ImageInfo>, duration_ms: u64) -> Self {
        Self {
            index: error.page(),
            state: PageState::Failed,
            image,
            result: None,
            error: Some(error),
            cached: false,
            poll_attempts: 0,
            duration_ms,
        }
    }
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub total_pages: usize,
    pub succeeded_pages: usize,
    pub failed_pages: usize,
    pub cached_pages: usize,
    pub total_regions: usize,
    pub total_duration_ms: u64,
}

/// The result of running one document through the pipeline.
///
/// `pages.len()` always equals `page_count`, and `pages[i].index == i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub document_id: Uuid,
    pub document_name: String,
    pub page_count: usize,
    pub pages: Vec<PageOutcome>,
    pub stats: RunStats,
}

impl PipelineRun {
    pub fn succeeded(&self) -> impl Iterator<Item = &PageOutcome> {
        self.pages.iter().filter(|p| p.is_success())
    }

    /// `(index, error)` for every failed page, in page order.
    pub fn failures(&self) -> Vec<(usize, &PageError)> {
        self.pages
            .iter()
            .filter_map(|p| p.error.as_ref().map(|e| (p.index, e)))
            .collect()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures().into_iter().map(|(i, _)| i).collect()
    }

    /// Some pages succeeded and some failed.
    pub fn is_partial(&self) -> bool {
        self.stats.failed_pages > 0 && self.stats.succeeded_pages > 0
    }

    /// Treat any page failure as an error.
    pub fn into_result(self) -> Result<Self, IngestError> {
        if self.stats.failed_pages == 0 {
            Ok(self)
        } else {
            Err(IngestError::PartialFailure {
                succeeded: self.stats.succeeded_pages,
                failed: self.stats.failed_pages,
                total: self.page_count,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(coords: Vec<f64>, text: &str) -> OcrRegion {
        OcrRegion {
            bounding_box: BoundingBox::try_from(coords).unwrap(),
            text: text.into(),
        }
    }

    #[test]
    fn bounding_box_rejects_wrong_arity() {
        assert!(BoundingBox::try_from(vec![1.0, 2.0, 3.0]).is_err());
        assert!(BoundingBox::try_from(vec![0.0; 6]).is_err());
        assert!(BoundingBox::try_from(vec![0.0; 4]).is_ok());
        assert!(BoundingBox::try_from(vec![0.0; 8]).is_ok());
    }

    #[test]
    fn bounding_box_rejects_nan() {
        assert!(BoundingBox::try_from(vec![0.0, f64::NAN, 1.0, 1.0]).is_err());
    }

    #[test]
    fn quad_rect_is_envelope() {
        let b = BoundingBox::try_from(vec![10.0, 20.0, 110.0, 22.0, 108.0, 60.0, 8.0, 58.0])
            .unwrap();
        assert_eq!(b.rect(), (8.0, 20.0, 110.0, 60.0));
        assert_eq!(b.center(), (59.0, 40.0));
    }

    #[test]
    fn four_value_box_is_left_top_width_height() {
        let b = BoundingBox::try_from(vec![10.0, 10.0, 20.0, 40.0]).unwrap();
        assert_eq!(b.rect(), (10.0, 10.0, 30.0, 50.0));
        assert_eq!(b.center(), (20.0, 30.0));
    }

    #[test]
    fn bounding_box_deserialise_validates() {
        let ok: Result<BoundingBox, _> = serde_json::from_str("[1,2,3,4]");
        assert!(ok.is_ok());
        let bad: Result<BoundingBox, _> = serde_json::from_str("[1,2,3]");
        assert!(bad.is_err());
    }

    #[test]
    fn regions_near_uses_box_center() {
        let result = OcrResult::succeeded(vec![
            region(vec![0.0, 0.0, 10.0, 10.0], "near"),
            region(vec![100.0, 100.0, 10.0, 10.0], "far"),
        ]);
        let hits = result.regions_near(5.0, 5.0, 1.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "near");
        assert!(result.regions_near(50.0, 50.0, 5.0).is_empty());
    }

    #[test]
    fn text_joins_regions_in_order() {
        let result = OcrResult::succeeded(vec![
            region(vec![0.0; 4], "Invoice"),
            region(vec![0.0; 4], "Total: 42"),
        ]);
        assert_eq!(result.text(), "Invoice\nTotal: 42");
    }

    #[test]
    fn empty_result_serialises_with_empty_regions() {
        let json = serde_json::to_value(OcrResult::succeeded(vec![])).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["regions"], serde_json::json!([]));
    }

    #[test]
    fn state_machine_happy_path() {
        use PageState::*;
        assert!(Pending.can_transition_to(Rasterized));
        assert!(Rasterized.can_transition_to(OcrSubmitted));
        assert!(OcrSubmitted.can_transition_to(OcrPolling));
        assert!(OcrPolling.can_transition_to(Succeeded));
    }

    #[test]
    fn state_machine_terminal_states_are_final() {
        use PageState::*;
        for next in [Pending, Rasterized, OcrSubmitted, OcrPolling, Succeeded, Failed] {
            assert!(!Succeeded.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn state_machine_rejects_skips() {
        use PageState::*;
        assert!(!Pending.can_transition_to(OcrPolling));
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!OcrSubmitted.can_transition_to(Succeeded));
        assert!(!Rasterized.can_transition_to(OcrPolling));
    }

    #[test]
    fn state_machine_allows_cache_hit_and_failure_from_any_live_state() {
        use PageState::*;
        assert!(Rasterized.can_transition_to(Succeeded));
        for from in [Pending, Rasterized, OcrSubmitted, OcrPolling] {
            assert!(from.can_transition_to(Failed), "{from:?}");
        }
    }

    fn run_with(outcomes: Vec<PageOutcome>) -> PipelineRun {
        let succeeded = outcomes.iter().filter(|p| p.is_success()).count();
        PipelineRun {
            document_id: Uuid::new_v4(),
            document_name: "doc".into(),
            page_count: outcomes.len(),
            stats: RunStats {
                total_pages: outcomes.len(),
                succeeded_pages: succeeded,
                failed_pages: outcomes.len() - succeeded,
                ..Default::default()
            },
            pages: outcomes,
        }
    }

    fn ok_page(index: usize) -> PageOutcome {
        PageOutcome {
            index,
            state: PageState::Succeeded,
            image: None,
            result: Some(OcrResult::succeeded(vec![])),
            error: None,
            cached: false,
            poll_attempts: 1,
            duration_ms: 1,
        }
    }

    #[test]
    fn partial_run_reports_failed_indices() {
        let run = run_with(vec![
            ok_page(0),
            PageOutcome::failed(
                PageError::OcrBackend {
                    page: 1,
                    reason: "bad image".into(),
                },
                None,
                3,
            ),
            ok_page(2),
        ]);
        assert!(run.is_partial());
        assert_eq!(run.failed_indices(), vec![1]);
        assert_eq!(run.succeeded().count(), 2);
        let err = run.into_result().unwrap_err();
        assert!(matches!(
            err,
            IngestError::PartialFailure {
                succeeded: 2,
                failed: 1,
                total: 3
            }
        ));
    }

    #[test]
    fn clean_run_into_result_is_ok() {
        let run = run_with(vec![ok_page(0), ok_page(1)]);
        assert!(!run.is_partial());
        assert!(run.into_result().is_ok());
    }
}
