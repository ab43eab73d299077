//! Artifact assembly: merge rendered label pages into one PDF and store it.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! Merging therefore runs on Tokio's blocking pool.
//!
//! ## Naming
//!
//! Stored files are named `{hint}_{unix_secs}_{8 hex}.pdf`. The random
//! suffix keeps two batches with the same upload name and the same second
//! from overwriting each other.

use crate::error::ZplError;
use pdfium_render::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Where a stored artifact lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactHandle {
    /// File name inside the store, used in download URLs.
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
}

impl ArtifactHandle {
    pub fn download_url(&self) -> String {
        format!("/download/{}", self.filename)
    }
}

/// Merges single-label PDFs, in the order given, into one document.
pub trait PageMerger: Send + Sync {
    fn merge(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>, ZplError>;
}

/// [`PageMerger`] backed by pdfium.
///
/// Binding order: explicit path, `PDFIUM_LIB_PATH`, then the system library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumMerger {
    lib_path: Option<PathBuf>,
}

impl PdfiumMerger {
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }

    fn bind(&self) -> Result<Pdfium, ZplError> {
        let explicit = self
            .lib_path
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match explicit {
            Some(path) => Pdfium::bind_to_library(&path)
                .map_err(|e| ZplError::PdfiumBindingFailed(format!("{}: {e}", path.display())))?,
            None => Pdfium::bind_to_system_library()
                .map_err(|e| ZplError::PdfiumBindingFailed(e.to_string()))?,
        };
        Ok(Pdfium::new(bindings))
    }
}

impl PageMerger for PdfiumMerger {
    fn merge(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>, ZplError> {
        let merge_err = |detail: String| ZplError::MergeFailed {
            pages: pages.len(),
            detail,
        };

        let pdfium = self.bind()?;
        let mut merged = pdfium
            .create_new_pdf()
            .map_err(|e| merge_err(format!("create document: {e:?}")))?;

        for (i, page) in pages.iter().enumerate() {
            let source = pdfium
                .load_pdf_from_byte_slice(page, None)
                .map_err(|e| merge_err(format!("page {} is not a readable PDF: {e:?}", i + 1)))?;
            merged
                .pages_mut()
                .append(&source)
                .map_err(|e| merge_err(format!("append page {}: {e:?}", i + 1)))?;
        }

        let bytes = merged
            .save_to_bytes()
            .map_err(|e| merge_err(format!("save: {e:?}")))?;
        debug!("Merged {} pages → {} bytes", pages.len(), bytes.len());
        Ok(bytes)
    }
}

/// Directory of merged PDFs.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (and create if needed) the store at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ZplError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| ZplError::StorageFailed {
            path: root.clone(),
            source: e,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` under a fresh unique name derived from `name_hint`.
    ///
    /// The file appears atomically: it is written to a temp file in the same
    /// directory and renamed into place.
    pub async fn write(&self, name_hint: &str, bytes: &[u8]) -> Result<ArtifactHandle, ZplError> {
        let filename = unique_filename(name_hint);
        let path = self.root.join(&filename);
        let storage_err = |source: std::io::Error| ZplError::StorageFailed {
            path: path.clone(),
            source,
        };

        let tmp_path = self.root.join(format!(".{filename}.tmp"));
        tokio::fs::write(&tmp_path, bytes).await.map_err(storage_err)?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(storage_err(e));
        }

        info!("Stored {} ({} bytes)", path.display(), bytes.len());
        Ok(ArtifactHandle { filename, path })
    }

    /// Resolve a download name to a stored file.
    ///
    /// Names that could escape the store are rejected as not found.
    pub fn locate(&self, filename: &str) -> Result<ArtifactHandle, ZplError> {
        let not_found = || ZplError::ArtifactNotFound {
            filename: filename.to_string(),
        };

        if filename.is_empty()
            || filename.starts_with('.')
            || filename.contains(['/', '\\'])
            || filename.contains("..")
        {
            return Err(not_found());
        }

        let path = self.root.join(filename);
        if !path.is_file() {
            return Err(not_found());
        }
        Ok(ArtifactHandle {
            filename: filename.to_string(),
            path,
        })
    }

    /// Read a stored artifact.
    pub async fn open(&self, filename: &str) -> Result<Vec<u8>, ZplError> {
        let handle = self.locate(filename)?;
        tokio::fs::read(&handle.path)
            .await
            .map_err(|_| ZplError::ArtifactNotFound {
                filename: filename.to_string(),
            })
    }

    /// Delete artifacts whose modification time is older than `age`.
    pub async fn prune_older_than(&self, age: Duration) -> Result<usize, ZplError> {
        let cutoff = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(UNIX_EPOCH);
        let io_err = |source: std::io::Error| ZplError::StorageFailed {
            path: self.root.clone(),
            source,
        };

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pdf") {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Cannot stat {}: {}", path.display(), e);
                    continue;
                }
            };
            if modified <= cutoff {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Cannot remove {}: {}", path.display(), e),
                }
            }
        }
        Ok(removed)
    }
}

/// Merge + store, as one step.
#[derive(Clone)]
pub struct ArtifactAssembler {
    merger: Arc<dyn PageMerger>,
    store: ArtifactStore,
}

impl ArtifactAssembler {
    pub fn new(merger: Arc<dyn PageMerger>, store: ArtifactStore) -> Self {
        Self { merger, store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Merge `pages` (already in submission order) and write the result.
    pub async fn assemble(
        &self,
        name_hint: &str,
        pages: Vec<Vec<u8>>,
    ) -> Result<ArtifactHandle, ZplError> {
        let bytes = merge_pages(Arc::clone(&self.merger), pages).await?;
        self.store.write(name_hint, &bytes).await
    }
}

/// Run a merger on the blocking pool.
pub async fn merge_pages(
    merger: Arc<dyn PageMerger>,
    pages: Vec<Vec<u8>>,
) -> Result<Vec<u8>, ZplError> {
    tokio::task::spawn_blocking(move || merger.merge(&pages))
        .await
        .map_err(|e| ZplError::Internal(format!("Merge task panicked: {}", e)))?
}

/// Reduce an arbitrary upload name to `[A-Za-z0-9_-]`, falling back to `labels`.
pub fn sanitize_name(hint: &str) -> String {
    let cleaned: String = hint
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "labels".to_string()
    } else {
        trimmed.chars().take(64).collect()
    }
}

fn unique_filename(name_hint: &str) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}.pdf", sanitize_name(name_hint), secs, &suffix[..8])
}
