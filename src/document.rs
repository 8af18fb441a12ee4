//! The uploaded document and the identifiers derived from it.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

static UNSAFE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));

static DOT_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").expect("valid regex"));

/// Longest document name kept; leaves room for `_page_<n>` within the
/// 200-character image-id limit of the result store.
const MAX_NAME_LEN: usize = 160;

/// One uploaded PDF, alive for the duration of a single pipeline run.
///
/// The page count is unknown until rasterisation opens the file, so it lives
/// on [`crate::output::PipelineRun`] rather than here.
#[derive(Debug, Clone)]
pub struct Document {
    id: Uuid,
    name: String,
    bytes: Vec<u8>,
}

impl Document {
    /// Wrap raw PDF bytes; the document name defaults to its UUID.
    pub fn new(bytes: Vec<u8>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            name: id.simple().to_string(),
            bytes,
        }
    }

    /// Wrap raw PDF bytes uploaded under `file_name`.
    ///
    /// The extension is dropped and anything outside `[A-Za-z0-9._-]` is
    /// replaced with `_`, so `"Q3 report.pdf"` becomes `"Q3_report"`. The
    /// name always starts with a letter or digit, never contains `..` and is
    /// at most 160 characters, so every derived image id is a valid store key.
    pub fn named(file_name: &str, bytes: Vec<u8>) -> Self {
        let mut doc = Self::new(bytes);
        if let Some(name) = sanitize_name(file_name) {
            doc.name = name;
        }
        doc
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex SHA-256 over the PDF bytes and the render scale.
    ///
    /// Stored next to each OCR result so a cached page is only reused for the
    /// same document rendered the same way, not for any upload sharing its name.
    pub fn fingerprint(&self, scale: f32) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hasher.update(scale.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    /// Stable result-store key for the page at 0-based `index`.
    ///
    /// Page numbers in the key are 1-based: `report_page_1`, `report_page_2`, …
    pub fn image_id(&self, index: usize) -> String {
        page_image_id(&self.name, index)
    }
}

/// `<name>_page_<index + 1>`.
pub fn page_image_id(document_name: &str, index: usize) -> String {
    format!("{}_page_{}", document_name, index + 1)
}

fn sanitize_name(file_name: &str) -> Option<String> {
    let base = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_name);
    let stem = match base.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => base,
    };
    let cleaned = UNSAFE_NAME_CHARS.replace_all(stem.trim(), "_");
    let cleaned = DOT_RUNS.replace_all(&cleaned, ".");
    let cleaned = cleaned.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
    // ASCII only at this point, so byte slicing is safe.
    let cleaned = &cleaned[..cleaned.len().min(MAX_NAME_LEN)];
    let cleaned = cleaned.trim_end_matches(['.', '_', '-']);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}
