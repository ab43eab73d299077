//! # zpl2pdf
//!
//! Turn a batch of ZPL (Zebra Programming Language) labels into a single
//! printable PDF, one page per label.
//!
//! ## Why this crate?
//!
//! Label exports from e-commerce and shipping platforms arrive as one long
//! blob of ZPL. The Labelary rendering service turns a *single* label into a
//! PDF page, is rate limited, and fails now and then. This crate splits the
//! blob into units that render on their own (keeping `~DGR` graphics
//! downloads together with the labels that recall them), renders them one by
//! one with a bounded retry budget, drops the units that never succeed, and
//! merges the rest into one document in the original order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! submission (text / .zpl / .txt / .zip)
//!  │
//!  ├─ 1. Input     decode text, pick the ZIP member, length check
//!  ├─ 2. Segment   ^XA … ^XZ blocks, or graphics + label pairs
//!  ├─ 3. Render    one HTTP call per unit, retry on 429 / transport errors
//!  ├─ 4. Assemble  merge pages in order via pdfium (spawn_blocking)
//!  └─ 5. Output    artifact on disk + per-unit results and stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zpl2pdf::{convert_to_file, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let stats = convert_to_file("labels.zpl", "labels.pdf", &config).await?;
//!     eprintln!("{}/{} labels rendered", stats.rendered_units, stats.total_units);
//!     Ok(())
//! }
//! ```
//!
//! ## Background jobs
//!
//! [`JobService`] accepts submissions, returns a [`JobId`] immediately and
//! converts on a Tokio task; [`ProgressTracker`] records are what the
//! `/status` route returns. With the `server` feature, [`server::serve`]
//! exposes the service over HTTP.
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `zpl2pdf` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `server` | on      | HTTP routes (axum + tower-http) |
//!
//! Disable both when using only the library:
//! ```toml
//! zpl2pdf = { version = "0.3", default-features = false }
//! ```
//!
//! ## PDFium
//!
//! Page merging binds pdfium at runtime: an explicit
//! [`ConversionConfig::pdfium_lib_path`], then `PDFIUM_LIB_PATH`, then the
//! system library.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
#[cfg(feature = "server")]
pub mod server;
pub mod service;
pub mod tracker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, LabelaryEndpoint, ServerSettings};
pub use convert::{convert, convert_batch, convert_submission, convert_to_file};
pub use error::{UnitError, ZplError};
pub use job::{BatchJob, JobId, JobStatus};
pub use output::{BatchOutput, ConversionOutput, ConversionStats, UnitResult};
pub use pipeline::assemble::{
    ArtifactAssembler, ArtifactHandle, ArtifactStore, PageMerger, PdfiumMerger,
};
pub use pipeline::input::Submission;
pub use pipeline::labelary::LabelaryRenderer;
pub use pipeline::render::{
    ConversionOutcome, LabelRenderer, RenderClient, RenderFailure, RenderResponse, RetryPolicy,
};
pub use pipeline::segment::{segment, Dialect, LabelUnit};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use service::JobService;
pub use tracker::{JobRecord, ProgressTracker, TrackerProgress};
