//! Error types for the zpl2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ZplError`] — **Fatal** for a submission or a batch: the input is
//!   unusable, nothing rendered, or the merged PDF could not be stored.
//!   Returned as `Err(ZplError)` from the top-level entry points.
//!
//! * [`UnitError`] — **Non-fatal**: a single label failed every attempt but
//!   the rest of the batch is fine. Stored inside
//!   [`crate::output::UnitResult`] so callers can inspect partial success
//!   instead of losing the whole batch to one bad label.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the zpl2pdf library.
#[derive(Debug, Error)]
pub enum ZplError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Neither pasted text nor a file was submitted.
    #[error("Nothing submitted: paste ZPL or upload a .zpl, .txt or .zip file")]
    EmptySubmission,

    /// The decoded content is shorter than the configured minimum.
    #[error("Content too short: {len} characters (minimum {min})")]
    ContentTooShort { len: usize, min: usize },

    /// The uploaded ZIP archive could not be opened or has no members.
    #[error("Invalid ZIP archive '{filename}': {reason}")]
    InvalidArchive { filename: String, reason: String },

    /// The content contains no `^XA … ^XZ` block.
    #[error("No labels found: expected at least one ^XA … ^XZ block")]
    NoLabelsFound,

    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Input file exists but could not be read.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Rendering errors ──────────────────────────────────────────────────
    /// Every label failed after all retries; there is nothing to merge.
    #[error("Conversion failed: all {total} labels failed after {attempts} attempts each. First error: {first_error}")]
    NoLabelsRendered {
        total: usize,
        attempts: u32,
        first_error: String,
    },

    /// The renderer reported a failure that retrying cannot fix.
    ///
    /// The batch stops at `label`; labels rendered before it are salvaged.
    #[error("Renderer aborted at label {label}: {reason}")]
    RendererAborted { label: usize, reason: String },

    // ── Artifact errors ───────────────────────────────────────────────────
    /// Rendered pages could not be merged into one PDF.
    #[error("Failed to merge {pages} pages: {detail}")]
    MergeFailed { pages: usize, detail: String },

    /// The merged PDF could not be written to storage.
    #[error("Failed to store '{path}': {source}")]
    StorageFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The requested artifact does not exist or the name is not acceptable.
    #[error("Artifact not found: '{filename}'")]
    ArtifactNotFound { filename: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is needed to merge label pages. You can:\n\
  • Install libpdfium system-wide, or\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ZplError {
    /// True for errors caused by the submitted content rather than by the
    /// renderer or storage. These map to HTTP 400.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ZplError::EmptySubmission
                | ZplError::ContentTooShort { .. }
                | ZplError::InvalidArchive { .. }
                | ZplError::NoLabelsFound
                | ZplError::FileNotFound { .. }
        )
    }
}

/// A non-fatal error for a single label.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// The renderer kept answering 429 until the attempts ran out.
    #[error("Label {label}: rate limited on all {attempts} attempts")]
    RateLimited { label: usize, attempts: u32 },

    /// Every attempt failed; `detail` describes the last one.
    #[error("Label {label}: failed after {attempts} attempts: {detail}")]
    RetriesExhausted {
        label: usize,
        attempts: u32,
        detail: String,
    },
}
