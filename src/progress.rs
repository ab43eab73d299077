//! Progress-callback trait for per-label conversion events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through a batch. The CLI forwards them to a
//! terminal progress bar; the HTTP service forwards them to the
//! [`crate::tracker::ProgressTracker`] via [`crate::tracker::TrackerProgress`].
//!
//! # Example
//!
//! ```rust
//! use zpl2pdf::{BatchProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rendered: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_unit_complete(&self, label: usize, total: usize, page_bytes: usize) {
//!         self.rendered.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Label {}/{} done ({} bytes)", label, total, page_bytes);
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { rendered: AtomicUsize::new(0) });
//! let config = ConversionConfig::builder()
//!     .progress_callback(cb as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::job::JobStatus;
use crate::output::ConversionStats;
use crate::pipeline::assemble::ArtifactHandle;
use std::sync::Arc;

/// Called by the conversion pipeline as it processes a batch.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Units within one batch are processed sequentially,
/// so calls for one batch never overlap.
pub trait BatchProgressCallback: Send + Sync {
    /// The batch entered a new phase.
    fn on_phase(&self, status: JobStatus) {
        let _ = status;
    }

    /// Called once before the first unit is sent.
    fn on_conversion_start(&self, total_units: usize) {
        let _ = total_units;
    }

    /// Called just before the first attempt for a unit (1-indexed).
    fn on_unit_start(&self, label: usize, total_units: usize) {
        let _ = (label, total_units);
    }

    /// Called when a unit rendered.
    fn on_unit_complete(&self, label: usize, total_units: usize, page_bytes: usize) {
        let _ = (label, total_units, page_bytes);
    }

    /// Called when a unit failed every attempt and was dropped.
    fn on_unit_error(&self, label: usize, total_units: usize, error: &str) {
        let _ = (label, total_units, error);
    }

    /// Terminal success. `artifact` is `None` for in-memory conversions.
    fn on_conversion_complete(&self, stats: &ConversionStats, artifact: Option<&ArtifactHandle>) {
        let _ = (stats, artifact);
    }

    /// Terminal failure. `salvaged` points at a partial artifact when pages
    /// rendered before an unexpected error were kept.
    fn on_conversion_failed(
        &self,
        stats: &ConversionStats,
        reason: &str,
        salvaged: Option<&ArtifactHandle>,
    ) {
        let _ = (stats, reason, salvaged);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        phases: Mutex<Vec<JobStatus>>,
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_phase(&self, status: JobStatus) {
            self.phases.lock().unwrap().push(status);
        }

        fn on_unit_start(&self, _label: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unit_complete(&self, _label: usize, _total: usize, _page_bytes: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unit_error(&self, _label: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_phase(JobStatus::Converting);
        cb.on_conversion_start(5);
        cb.on_unit_start(1, 5);
        cb.on_unit_complete(1, 5, 42);
        cb.on_unit_error(2, 5, "HTTP 500");
        cb.on_conversion_complete(&ConversionStats::default(), None);
        cb.on_conversion_failed(&ConversionStats::default(), "boom", None);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_phase(JobStatus::Converting);
        tracker.on_unit_start(1, 2);
        tracker.on_unit_complete(1, 2, 100);
        tracker.on_unit_start(2, 2);
        tracker.on_unit_error(2, 2, "rate limited");
        tracker.on_phase(JobStatus::Finalizing);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(
            *tracker.phases.lock().unwrap(),
            vec![JobStatus::Converting, JobStatus::Finalizing]
        );
    }
}
