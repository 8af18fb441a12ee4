//! Result store: OCR results keyed by image identifier.
//!
//! [`FsResultStore`] keeps one `<image_id>.json` file per page under a root
//! directory. Every write goes to its own uniquely named temp file in the same
//! directory and is renamed into place, so a reader never sees a half-written
//! result and concurrent writers to one key resolve as last-writer-wins. [`MemoryResultStore`] is the
//! in-process equivalent used by tests and embedders that don't want files.

use crate::error::StoreError;
use crate::output::OcrResult;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Identifiers become file names, so only a conservative alphabet is allowed.
static IMAGE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,199}$").expect("static regex"));

/// Reject identifiers that cannot be used as a storage key.
pub fn validate_image_id(image_id: &str) -> Result<(), StoreError> {
    if IMAGE_ID.is_match(image_id) && !image_id.contains("..") {
        Ok(())
    } else {
        Err(StoreError::InvalidKey {
            image_id: image_id.to_string(),
        })
    }
}

/// Keyed persistence for [`OcrResult`]s.
///
/// `put` on an existing key overwrites it. `get` distinguishes "never stored"
/// ([`StoreError::NotFound`]) from a stored result with zero regions.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn put(&self, image_id: &str, result: &OcrResult) -> Result<(), StoreError>;

    async fn get(&self, image_id: &str) -> Result<OcrResult, StoreError>;

    /// Remove a stored result. Returns `false` when nothing was stored.
    async fn delete(&self, image_id: &str) -> Result<bool, StoreError>;

    /// `Ok(None)` instead of `NotFound`.
    async fn find(&self, image_id: &str) -> Result<Option<OcrResult>, StoreError> {
        match self.get(image_id).await {
            Ok(r) => Ok(Some(r)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// One JSON file per image under `root`.
#[derive(Debug, Clone)]
pub struct FsResultStore {
    root: PathBuf,
}

impl FsResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, image_id: &str) -> Result<PathBuf, StoreError> {
        validate_image_id(image_id)?;
        Ok(self.root.join(format!("{}.json", image_id)))
    }
}

fn io_err(image_id: &str) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        image_id: image_id.to_string(),
        source,
    }
}

/// Write `bytes` to a fresh temp file in `root`, then rename it onto `target`.
///
/// The temp file is removed if anything fails before the rename.
fn write_atomic(root: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(root)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".pdfocr-")
        .suffix(".json.tmp")
        .tempfile_in(root)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl ResultStore for FsResultStore {
    async fn put(&self, image_id: &str, result: &OcrResult) -> Result<(), StoreError> {
        let path = self.path_for(image_id)?;
        let json = serde_json::to_vec_pretty(result).map_err(|e| StoreError::Corrupt {
            image_id: image_id.to_string(),
            detail: e.to_string(),
        })?;

        let size = json.len();
        let root = self.root.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&root, &target, &json))
            .await
            .map_err(|e| io_err(image_id)(std::io::Error::other(e)))?
            .map_err(io_err(image_id))?;

        debug!("Stored result {} ({} bytes)", path.display(), size);
        Ok(())
    }

    async fn get(&self, image_id: &str) -> Result<OcrResult, StoreError> {
        let path = self.path_for(image_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    image_id: image_id.to_string(),
                })
            }
            Err(e) => return Err(io_err(image_id)(e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            image_id: image_id.to_string(),
            detail: e.to_string(),
        })
    }

    async fn delete(&self, image_id: &str) -> Result<bool, StoreError> {
        let path = self.path_for(image_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(image_id)(e)),
        }
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    results: RwLock<HashMap<String, OcrResult>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(&self, image_id: &str, result: &OcrResult) -> Result<(), StoreError> {
        validate_image_id(image_id)?;
        self.results
            .write()
            .await
            .insert(image_id.to_string(), result.clone());
        Ok(())
    }

    async fn get(&self, image_id: &str) -> Result<OcrResult, StoreError> {
        validate_image_id(image_id)?;
        self.results
            .read()
            .await
            .get(image_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                image_id: image_id.to_string(),
            })
    }

    async fn delete(&self, image_id: &str) -> Result<bool, StoreError> {
        validate_image_id(image_id)?;
        Ok(self.results.write().await.remove(image_id).is_some())
    }
}
