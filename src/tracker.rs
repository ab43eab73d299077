//! Process-wide job progress, keyed by [`JobId`].
//!
//! One [`ProgressTracker`] is created at startup and shared (via `Arc`) by the
//! job service, its workers and the status route. Each entry is written only
//! by the worker that owns the job; pollers read at any time.
//!
//! Writes replace the whole record under the entry's shard lock, so a reader
//! racing a writer observes either the previous or the next record, never a
//! half-applied one.

use crate::job::{JobId, JobStatus};
use crate::output::ConversionStats;
use crate::pipeline::assemble::ArtifactHandle;
use crate::progress::BatchProgressCallback;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Snapshot of one job, as returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub status: JobStatus,
    /// 1-indexed label currently (or last) being converted; 0 before start.
    pub current: usize,
    pub total: usize,
    pub rendered: usize,
    /// Labels dropped after exhausting their attempts.
    pub failed: usize,
    /// Base name of the submission.
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub updated_at: Instant,
}

impl JobRecord {
    fn new(total: usize, filename: String) -> Self {
        Self {
            status: JobStatus::Created,
            current: 0,
            total,
            rendered: 0,
            failed: 0,
            filename,
            download_url: None,
            error: None,
            updated_at: Instant::now(),
        }
    }
}

/// Keyed store of [`JobRecord`]s with per-key atomic replace.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    jobs: DashMap<JobId, JobRecord>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. An existing record under the same id is replaced.
    pub fn create(&self, id: JobId, total: usize, filename: impl Into<String>) {
        self.jobs.insert(id, JobRecord::new(total, filename.into()));
    }

    /// Apply `mutation` to a copy of the record and store the copy.
    ///
    /// Returns `false` when `id` is unknown.
    pub fn update(&self, id: JobId, mutation: impl FnOnce(&mut JobRecord)) -> bool {
        match self.jobs.get_mut(&id) {
            Some(mut entry) => {
                let mut next = entry.clone();
                mutation(&mut next);
                next.updated_at = Instant::now();
                *entry = next;
                true
            }
            None => {
                debug!("Ignoring update for unknown job {}", id);
                false
            }
        }
    }

    /// Move a job to `status` if that is a forward transition.
    pub fn advance(&self, id: JobId, status: JobStatus) -> bool {
        let mut moved = false;
        self.update(id, |record| {
            if record.status.can_advance_to(status) {
                record.status = status;
                moved = true;
            } else {
                warn!(
                    "Job {}: refusing transition {} → {}",
                    id, record.status, status
                );
            }
        });
        moved
    }

    /// Current record, or `None` when the job was never created (or evicted).
    pub fn read(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.get(&id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Remove terminal records last touched before `cutoff`. Returns how many
    /// were removed. In-flight jobs are never evicted.
    pub fn evict_finished_before(&self, cutoff: Instant) -> usize {
        let before = self.jobs.len();
        self.jobs
            .retain(|_, record| !(record.status.is_terminal() && record.updated_at <= cutoff));
        before.saturating_sub(self.jobs.len())
    }
}

/// Forwards batch progress events for one job into the tracker.
pub struct TrackerProgress {
    tracker: Arc<ProgressTracker>,
    job_id: JobId,
}

impl TrackerProgress {
    pub fn new(tracker: Arc<ProgressTracker>, job_id: JobId) -> Self {
        Self { tracker, job_id }
    }
}

impl BatchProgressCallback for TrackerProgress {
    fn on_phase(&self, status: JobStatus) {
        // Terminal states are written together with their payload below.
        if !status.is_terminal() {
            self.tracker.advance(self.job_id, status);
        }
    }

    fn on_conversion_start(&self, total_units: usize) {
        self.tracker.update(self.job_id, |r| r.total = total_units);
    }

    fn on_unit_start(&self, label: usize, _total_units: usize) {
        self.tracker
            .update(self.job_id, |r| r.current = r.current.max(label));
    }

    fn on_unit_complete(&self, _label: usize, _total_units: usize, _page_bytes: usize) {
        self.tracker.update(self.job_id, |r| r.rendered += 1);
    }

    fn on_unit_error(&self, _label: usize, _total_units: usize, _error: &str) {
        self.tracker.update(self.job_id, |r| r.failed += 1);
    }

    fn on_conversion_complete(&self, stats: &ConversionStats, artifact: Option<&ArtifactHandle>) {
        self.tracker.update(self.job_id, |r| {
            r.status = JobStatus::Completed;
            r.rendered = stats.rendered_units;
            r.failed = stats.total_units - stats.rendered_units;
            r.download_url = artifact.map(ArtifactHandle::download_url);
        });
    }

    fn on_conversion_failed(
        &self,
        stats: &ConversionStats,
        reason: &str,
        salvaged: Option<&ArtifactHandle>,
    ) {
        self.tracker.update(self.job_id, |r| {
            r.status = JobStatus::Failed;
            r.rendered = stats.rendered_units;
            r.failed = stats.total_units - stats.rendered_units;
            r.error = Some(reason.to_string());
            r.download_url = salvaged.map(ArtifactHandle::download_url);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn read_unknown_job_is_none() {
        let tracker = ProgressTracker::new();
        assert!(tracker.read(JobId::new()).is_none());
    }

    #[test]
    fn create_initialises_record() {
        let tracker = ProgressTracker::new();
        let id = JobId::new();
        tracker.create(id, 12, "orders");

        let r = tracker.read(id).unwrap();
        assert_eq!(r.status, JobStatus::Created);
        assert_eq!((r.current, r.total, r.rendered, r.failed), (0, 12, 0, 0));
        assert_eq!(r.filename, "orders");
        assert!(r.download_url.is_none());
    }

    #[test]
    fn repeated_reads_are_identical() {
        let tracker = ProgressTracker::new();
        let id = JobId::new();
        tracker.create(id, 3, "x");
        tracker.advance(id, JobStatus::Converting);
        assert_eq!(tracker.read(id), tracker.read(id));
    }

    #[test]
    fn update_unknown_job_is_ignored() {
        let tracker = ProgressTracker::new();
        assert!(!tracker.update(JobId::new(), |r| r.current = 1));
        assert!(tracker.is_empty());
    }

    #[test]
    fn advance_rejects_backward_and_post_terminal_moves() {
        let tracker = ProgressTracker::new();
        let id = JobId::new();
        tracker.create(id, 1, "x");

        assert!(tracker.advance(id, JobStatus::Converting));
        assert!(!tracker.advance(id, JobStatus::Reading));
        assert!(tracker.advance(id, JobStatus::Failed));
        assert!(!tracker.advance(id, JobStatus::Completed));
        assert_eq!(tracker.read(id).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn tracker_progress_writes_terminal_record_at_once() {
        let tracker = Arc::new(ProgressTracker::new());
        let id = JobId::new();
        tracker.create(id, 3, "batch");
        let cb = TrackerProgress::new(Arc::clone(&tracker), id);

        cb.on_phase(JobStatus::Converting);
        cb.on_unit_start(1, 3);
        cb.on_unit_complete(1, 3, 10);
        cb.on_unit_start(2, 3);
        cb.on_unit_error(2, 3, "HTTP 500");
        cb.on_unit_start(3, 3);
        cb.on_unit_complete(3, 3, 10);

        let mid = tracker.read(id).unwrap();
        assert_eq!(mid.status, JobStatus::Converting);
        assert_eq!((mid.current, mid.rendered, mid.failed), (3, 2, 1));

        cb.on_phase(JobStatus::Finalizing);
        let stats = ConversionStats {
            total_units: 3,
            rendered_units: 2,
            failed_units: 1,
            total_attempts: 5,
            duration_ms: 9,
        };
        let handle = ArtifactHandle {
            filename: "batch_1_abcd1234.pdf".into(),
            path: PathBuf::from("downloads/batch_1_abcd1234.pdf"),
        };
        cb.on_conversion_complete(&stats, Some(&handle));

        let done = tracker.read(id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(
            done.download_url.as_deref(),
            Some("/download/batch_1_abcd1234.pdf")
        );
        assert_eq!(done.failed, 1);
    }

    #[test]
    fn eviction_keeps_running_jobs() {
        let tracker = ProgressTracker::new();
        let running = JobId::new();
        let finished = JobId::new();
        tracker.create(running, 1, "a");
        tracker.create(finished, 1, "b");
        tracker.advance(finished, JobStatus::Completed);

        let removed = tracker.evict_finished_before(Instant::now() + Duration::from_secs(1));
        assert_eq!(removed, 1);
        assert!(tracker.read(running).is_some());
        assert!(tracker.read(finished).is_none());
    }

    #[test]
    fn concurrent_writers_do_not_interfere() {
        let tracker = Arc::new(ProgressTracker::new());
        let ids: Vec<JobId> = (0..8).map(|_| JobId::new()).collect();
        for id in &ids {
            tracker.create(*id, 100, "x");
        }

        std::thread::scope(|s| {
            for id in &ids {
                let tracker = Arc::clone(&tracker);
                s.spawn(move || {
                    for label in 1..=100 {
                        tracker.update(*id, |r| {
                            r.current = label;
                            r.rendered += 1;
                        });
                    }
                });
            }
        });

        for id in ids {
            let r = tracker.read(id).unwrap();
            assert_eq!((r.current, r.rendered), (100, 100));
        }
    }
}
