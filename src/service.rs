//! Background job service: accepts submissions and converts them off the
//! request path.
//!
//! [`JobService::submit`] decodes and segments the submission on the blocking
//! pool, rejects bad input, and returns a [`JobId`] without waiting for the
//! renderer. The batch itself
//! runs on its own Tokio task; callers poll [`JobService::status`] until the
//! record reaches `completed` or `failed`. The returned id is for status
//! lookup only: there is no cancellation.
//!
//! At most `max_concurrent_jobs` batches convert at once. Jobs waiting for a
//! slot stay in `created`.

use crate::config::{ConversionConfig, ServerSettings};
use crate::convert::{convert_batch, resolve_merger};
use crate::error::ZplError;
use crate::job::{BatchJob, JobId, JobStatus};
use crate::pipeline::assemble::{ArtifactAssembler, ArtifactStore};
use crate::pipeline::input::{read_submission, Submission};
use crate::pipeline::segment;
use crate::tracker::{JobRecord, ProgressTracker, TrackerProgress};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Owns the tracker, the artifact store and the concurrency limit.
#[derive(Clone)]
pub struct JobService {
    tracker: Arc<ProgressTracker>,
    config: ConversionConfig,
    assembler: ArtifactAssembler,
    permits: Arc<Semaphore>,
}

impl JobService {
    /// Build a service that stores artifacts under `config.output_dir`.
    pub fn new(config: ConversionConfig, settings: &ServerSettings) -> Result<Self, ZplError> {
        Self::with_tracker(config, settings, Arc::new(ProgressTracker::new()))
    }

    /// Like [`JobService::new`], sharing an existing tracker.
    pub fn with_tracker(
        config: ConversionConfig,
        settings: &ServerSettings,
        tracker: Arc<ProgressTracker>,
    ) -> Result<Self, ZplError> {
        if settings.max_concurrent_jobs == 0 {
            return Err(ZplError::InvalidConfig(
                "max_concurrent_jobs must be ≥ 1".into(),
            ));
        }
        let store = ArtifactStore::new(&config.output_dir)?;
        let assembler = ArtifactAssembler::new(resolve_merger(&config), store);
        Ok(Self {
            tracker,
            config,
            assembler,
            permits: Arc::new(Semaphore::new(settings.max_concurrent_jobs)),
        })
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn store(&self) -> &ArtifactStore {
        self.assembler.store()
    }

    /// Validate a submission and start converting it in the background.
    ///
    /// # Errors
    /// Input errors ([`ZplError::is_input_error`]), or
    /// [`ZplError::Internal`] if the decoding task dies. Nothing is tracked
    /// and no task is spawned for a rejected submission.
    pub async fn submit(&self, submission: Submission) -> Result<JobId, ZplError> {
        let min_content_len = self.config.min_content_len;
        // Archive members can be large; keep decompression off the runtime.
        let job = tokio::task::spawn_blocking(move || {
            let text = read_submission(submission, min_content_len)?;
            let units = segment::segment(&text.text);
            if units.is_empty() {
                return Err(ZplError::NoLabelsFound);
            }
            Ok(BatchJob::new(text.name, units))
        })
        .await
        .map_err(|e| ZplError::Internal(format!("Submission task failed: {e}")))??;

        let id = job.id;
        self.tracker.create(id, job.total(), job.name.clone());
        info!("Job {}: accepted {} labels from '{}'", id, job.total(), job.name);

        let worker = self.clone();
        tokio::spawn(async move { worker.run(job).await });
        Ok(id)
    }

    /// Current record for `id`, or `None` if unknown.
    pub fn status(&self, id: JobId) -> Option<JobRecord> {
        self.tracker.read(id)
    }

    /// Bytes of a stored artifact.
    pub async fn open_artifact(&self, filename: &str) -> Result<Vec<u8>, ZplError> {
        self.assembler.store().open(filename).await
    }

    /// Drop finished job records and artifacts older than `retention`.
    ///
    /// Returns `(records, artifacts)` removed.
    pub async fn sweep(&self, retention: Duration) -> Result<(usize, usize), ZplError> {
        let cutoff = Instant::now().checked_sub(retention);
        let records = match cutoff {
            Some(cutoff) => self.tracker.evict_finished_before(cutoff),
            None => 0,
        };
        let artifacts = self.assembler.store().prune_older_than(retention).await?;
        if records + artifacts > 0 {
            info!(
                "Retention sweep: evicted {} job records, {} artifacts",
                records, artifacts
            );
        }
        Ok((records, artifacts))
    }

    /// Worker body: wait for a slot, convert, and make sure the record ends
    /// terminal even if the conversion task dies.
    async fn run(self, job: BatchJob) {
        let id = job.id;
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.mark_failed(id, "job service is shutting down");
                return;
            }
        };
        debug!("Job {}: acquired conversion slot", id);

        let mut config = self.config.clone();
        config.progress_callback = Some(Arc::new(TrackerProgress::new(
            Arc::clone(&self.tracker),
            id,
        )));
        let assembler = self.assembler.clone();

        let handle =
            tokio::spawn(async move { convert_batch(&job, &config, &assembler).await });

        match handle.await {
            Ok(Ok(_)) => {}
            // Normally already terminal through the callback; this covers
            // errors raised before the batch reported anything.
            Ok(Err(e)) => self.mark_failed(id, &e.to_string()),
            Err(e) => {
                error!("Job {}: conversion task died: {}", id, e);
                self.mark_failed(id, &format!("Conversion task died: {e}"));
            }
        }
    }

    fn mark_failed(&self, id: JobId, reason: &str) {
        self.tracker.update(id, |r| {
            if !r.status.is_terminal() {
                r.status = JobStatus::Failed;
                r.error = Some(reason.to_string());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::assemble::PageMerger;
    use crate::pipeline::render::{LabelRenderer, RenderFailure, RenderResponse};
    use async_trait::async_trait;

    struct EchoRenderer;

    #[async_trait]
    impl LabelRenderer for EchoRenderer {
        fn name(&self) -> &str {
            "echo"
        }

        async fn render(&self, zpl: &str) -> Result<RenderResponse, RenderFailure> {
            Ok(RenderResponse::ok(zpl.as_bytes().to_vec()))
        }
    }

    struct JoinMerger;

    impl PageMerger for JoinMerger {
        fn merge(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>, ZplError> {
            Ok(pages.join(&b'|'))
        }
    }

    fn service(dir: &std::path::Path, settings: ServerSettings) -> JobService {
        let config = ConversionConfig::builder()
            .renderer(Arc::new(EchoRenderer))
            .merger(Arc::new(JoinMerger))
            .unit_pacing(Duration::ZERO)
            .output_dir(dir)
            .build()
            .unwrap();
        JobService::new(config, &settings).unwrap()
    }

    async fn wait_terminal(service: &JobService, id: JobId) -> JobRecord {
        for _ in 0..200 {
            if let Some(r) = service.status(id).filter(|r| r.status.is_terminal()) {
                return r;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn rejected_submission_is_not_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), ServerSettings::default());

        let err = svc
            .submit(Submission::Text("no labels in here at all".into()))
            .await
            .unwrap_err();
        assert!(err.is_input_error());
        assert!(svc.tracker().is_empty());
    }

    #[tokio::test]
    async fn submitted_job_completes_with_download_url() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), ServerSettings::default());

        let id = svc
            .submit(Submission::File {
                filename: "orders.zpl".into(),
                bytes: b"^XA^FDone^XZ^XA^FDtwo^XZ".to_vec(),
            })
            .await
            .unwrap();

        let record = wait_terminal(&svc, id).await;
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!((record.current, record.total, record.rendered), (2, 2, 2));
        let url = record.download_url.unwrap();
        let filename = url.strip_prefix("/download/").unwrap();
        assert!(filename.starts_with("orders_"));
        assert_eq!(
            svc.open_artifact(filename).await.unwrap(),
            b"^XA^FDone^XZ|^XA^FDtwo^XZ"
        );
    }

    #[test]
    fn zero_job_slots_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConversionConfig::builder().output_dir(dir.path()).build().unwrap();
        let settings = ServerSettings {
            max_concurrent_jobs: 0,
            ..ServerSettings::default()
        };
        assert!(matches!(
            JobService::new(config, &settings),
            Err(ZplError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn sweep_removes_finished_jobs_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), ServerSettings::default());
        let id = svc
            .submit(Submission::Text("^XA^FDswept^FS^XZ".into()))
            .await
            .unwrap();
        wait_terminal(&svc, id).await;

        let (records, artifacts) = svc.sweep(Duration::ZERO).await.unwrap();
        assert_eq!((records, artifacts), (1, 1));
        assert!(svc.status(id).is_none());
    }
}
