//! Temporary holding area for uploaded PDF bytes.
//!
//! pdfium opens documents from a file-system path, so uploaded bytes are
//! parked in a [`NamedTempFile`] for the duration of rasterisation. The file
//! is deleted exactly once: either by an explicit [`TempBlob::release`] or by
//! `Drop` on any other exit path (error, cancellation, panic unwinding).
//! Each acquisition gets its own random token, so concurrent uploads never
//! share a path.

use crate::error::IngestError;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

/// Factory for [`TempBlob`]s rooted in one directory.
#[derive(Debug, Clone, Default)]
pub struct TempBlobStore {
    root: Option<PathBuf>,
}

impl TempBlobStore {
    /// Store blobs in the OS temp directory.
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Store blobs under `dir` (created on first acquire).
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(dir.into()),
        }
    }

    /// Copy `bytes` into a fresh temporary file.
    pub fn acquire(&self, bytes: &[u8]) -> Result<TempBlob, IngestError> {
        let token = Uuid::new_v4();
        let prefix = format!("pdfocr-{}-", token.simple());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(".pdf");

        let mut file = match &self.root {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .map_err(|source| IngestError::TempStorage { source })?;
                builder.tempfile_in(dir)
            }
            None => builder.tempfile(),
        }
        .map_err(|source| IngestError::TempStorage { source })?;

        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|source| IngestError::TempStorage { source })?;

        debug!(
            "Acquired temp blob {} ({} bytes) at {}",
            token,
            bytes.len(),
            file.path().display()
        );
        Ok(TempBlob { file, token })
    }

    /// Acquire, run `f` with the blob path, and release on every exit path.
    ///
    /// The blob is released after `f`'s future resolves, whether it returned
    /// `Ok` or `Err`. If the returned future is dropped early the blob is
    /// released by `Drop`.
    pub async fn with_blob<F, Fut, T>(&self, bytes: &[u8], f: F) -> Result<T, IngestError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let blob = self.acquire(bytes)?;
        let result = f(blob.path().to_path_buf()).await;
        if let Err(e) = blob.release() {
            warn!("Failed to remove temp blob: {}", e);
        }
        result
    }
}

/// One acquired temporary copy of a PDF.
#[derive(Debug)]
pub struct TempBlob {
    file: NamedTempFile,
    token: Uuid,
}

impl TempBlob {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Opaque identifier unique to this acquisition.
    pub fn token(&self) -> Uuid {
        self.token
    }

    /// Delete the backing file now, reporting any I/O error.
    ///
    /// Consumes the handle, so a blob can only be released once.
    pub fn release(self) -> std::io::Result<()> {
        debug!("Releasing temp blob {}", self.token);
        self.file.close()
    }
}
