//! Conversion entry points.
//!
//! ## Two ways in
//!
//! [`convert_batch`] is the background path used by the job service: the
//! submission has already been read and segmented, pages are merged and the
//! artifact lands in the [`ArtifactStore`](crate::pipeline::assemble::ArtifactStore).
//!
//! [`convert`] / [`convert_to_file`] are the direct library path used by the
//! CLI: read a local file, convert, and hand back (or write) the merged PDF.
//!
//! Both walk units strictly in submission order, one at a time, with a fixed
//! pause after each unit so a large batch does not trip the renderer's rate
//! limiter.

use crate::config::ConversionConfig;
use crate::error::ZplError;
use crate::job::{BatchJob, JobStatus};
use crate::output::{BatchOutput, ConversionOutput, ConversionStats, UnitResult};
use crate::pipeline::assemble::{
    merge_pages, ArtifactAssembler, ArtifactHandle, PageMerger, PdfiumMerger,
};
use crate::pipeline::input::{self, Submission};
use crate::pipeline::labelary::LabelaryRenderer;
use crate::pipeline::render::{ConversionOutcome, LabelRenderer, RenderClient};
use crate::pipeline::segment::{self, LabelUnit};
use crate::progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Convert an already-segmented batch and store the merged PDF.
///
/// # Returns
/// `Ok(BatchOutput)` when at least one unit rendered and the artifact was
/// stored, even if some units were dropped (see `stats.failed_units`).
///
/// # Errors
/// - [`ZplError::NoLabelsRendered`]: every unit failed; nothing is stored.
/// - [`ZplError::RendererAborted`]: the renderer gave up mid-batch. Pages
///   rendered up to that point are stored as a partial artifact and reported
///   through `on_conversion_failed`.
/// - [`ZplError::MergeFailed`] / [`ZplError::StorageFailed`].
/// - [`ZplError::InvalidConfig`]: no renderer could be built from the
///   endpoint settings; nothing is sent.
///
/// Every outcome, success or failure, is reported to the progress callback
/// exactly once as a terminal event.
pub async fn convert_batch(
    job: &BatchJob,
    config: &ConversionConfig,
    assembler: &ArtifactAssembler,
) -> Result<BatchOutput, ZplError> {
    let start = Instant::now();
    let cb = callback(config);
    let total = job.total();
    let renderer = match resolve_renderer(config) {
        Ok(renderer) => renderer,
        Err(err) => {
            error!("Job {}: {}", job.id, err);
            let stats = ConversionStats::from_results(total, &[], elapsed_ms(start));
            cb.on_conversion_failed(&stats, &err.to_string(), None);
            return Err(err);
        }
    };
    let client = RenderClient::new(renderer, config.retry.clone());
    info!("Job {}: converting {} labels ('{}')", job.id, total, job.name);

    cb.on_phase(JobStatus::Converting);
    cb.on_conversion_start(total);

    let run = render_units(&job.units, &client, config, cb.as_ref()).await;
    let stats = ConversionStats::from_results(total, &run.results, elapsed_ms(start));

    if let Some(err) = run.aborted {
        let salvaged = salvage(job, assembler, &run.results).await;
        error!("Job {}: {}", job.id, err);
        cb.on_conversion_failed(&stats, &err.to_string(), salvaged.as_ref());
        return Err(err);
    }

    if stats.rendered_units == 0 {
        let err = no_labels_rendered(&run.results, config);
        warn!("Job {}: {}", job.id, err);
        cb.on_conversion_failed(&stats, &err.to_string(), None);
        return Err(err);
    }

    cb.on_phase(JobStatus::Finalizing);
    let pages = rendered_pages(run.results);
    let artifact = match assembler.assemble(&job.name, pages).await {
        Ok(handle) => handle,
        Err(err) => {
            error!("Job {}: {}", job.id, err);
            cb.on_conversion_failed(&stats, &err.to_string(), None);
            return Err(err);
        }
    };

    let stats = ConversionStats {
        duration_ms: elapsed_ms(start),
        ..stats
    };
    info!(
        "Job {}: {}/{} labels → {} ({}ms)",
        job.id, stats.rendered_units, total, artifact.filename, stats.duration_ms
    );
    cb.on_conversion_complete(&stats, Some(&artifact));

    Ok(BatchOutput { artifact, stats })
}

/// Convert a local `.zpl`, `.txt` or `.zip` file to a merged PDF in memory.
///
/// # Errors
/// Input errors ([`ZplError::FileNotFound`], [`ZplError::ContentTooShort`],
/// [`ZplError::NoLabelsFound`], …) before anything is sent, then
/// [`ZplError::NoLabelsRendered`] or [`ZplError::RendererAborted`] if
/// rendering produced nothing usable. Unlike [`convert_batch`], an abort
/// here returns no partial PDF.
pub async fn convert(
    input_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ZplError> {
    let start = Instant::now();
    callback(config).on_phase(JobStatus::Reading);
    let submission = input::load_file(input_path.as_ref()).await?;
    convert_read(submission, config, start).await
}

/// Like [`convert`], for a submission already in memory.
pub async fn convert_submission(
    submission: Submission,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ZplError> {
    callback(config).on_phase(JobStatus::Reading);
    convert_read(submission, config, Instant::now()).await
}

async fn convert_read(
    submission: Submission,
    config: &ConversionConfig,
    start: Instant,
) -> Result<ConversionOutput, ZplError> {
    let cb = callback(config);
    let text = input::read_submission(submission, config.min_content_len)?;

    cb.on_phase(JobStatus::Analyzing);
    let units = segment::segment(&text.text);
    if units.is_empty() {
        return Err(ZplError::NoLabelsFound);
    }
    debug!(
        "'{}': {} labels ({:?})",
        text.name,
        units.len(),
        segment::detect_dialect(&text.text)
    );

    let client = RenderClient::new(resolve_renderer(config)?, config.retry.clone());

    cb.on_phase(JobStatus::Converting);
    cb.on_conversion_start(units.len());
    let run = render_units(&units, &client, config, cb.as_ref()).await;

    let stats = ConversionStats::from_results(units.len(), &run.results, elapsed_ms(start));
    if let Some(err) = run.aborted {
        cb.on_conversion_failed(&stats, &err.to_string(), None);
        return Err(err);
    }
    if stats.rendered_units == 0 {
        let err = no_labels_rendered(&run.results, config);
        cb.on_conversion_failed(&stats, &err.to_string(), None);
        return Err(err);
    }

    cb.on_phase(JobStatus::Finalizing);
    let pages: Vec<Vec<u8>> = run
        .results
        .iter()
        .filter_map(|r| r.page().map(<[u8]>::to_vec))
        .collect();
    let pdf = match merge_pages(resolve_merger(config), pages).await {
        Ok(pdf) => pdf,
        Err(err) => {
            cb.on_conversion_failed(&stats, &err.to_string(), None);
            return Err(err);
        }
    };

    let stats = ConversionStats {
        duration_ms: elapsed_ms(start),
        ..stats
    };
    info!(
        "Conversion complete: {}/{} labels, {}ms total",
        stats.rendered_units, stats.total_units, stats.duration_ms
    );
    cb.on_conversion_complete(&stats, None);

    Ok(ConversionOutput {
        pdf,
        units: run.results,
        stats,
    })
}

/// Convert a file and write the merged PDF to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, ZplError> {
    let output = convert(input_path, config).await?;
    let path = output_path.as_ref();
    let storage_err = |source: std::io::Error| ZplError::StorageFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
    }

    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, &output.pdf)
        .await
        .map_err(storage_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(storage_err(e));
    }

    info!("Wrote {} ({} bytes)", path.display(), output.pdf.len());
    Ok(output.stats)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Unit results so far, plus the error that stopped the loop early, if any.
struct UnitRun {
    results: Vec<UnitResult>,
    aborted: Option<ZplError>,
}

/// Render `units` in order, pausing `config.unit_pacing` after each one.
///
/// A fatal renderer error or a renderer panic stops the loop; results
/// collected so far are returned alongside it.
async fn render_units(
    units: &[LabelUnit],
    client: &RenderClient,
    config: &ConversionConfig,
    cb: &dyn BatchProgressCallback,
) -> UnitRun {
    let total = units.len();
    let mut results = Vec::with_capacity(total);

    for (i, unit) in units.iter().enumerate() {
        let label = i + 1;
        cb.on_unit_start(label, total);

        let attempt = AssertUnwindSafe(client.render(label, unit)).catch_unwind();
        let outcome = attempt.await.unwrap_or_else(|panic| {
            Err(ZplError::Internal(format!(
                "renderer panicked on label {label}: {}",
                panic_message(panic.as_ref())
            )))
        });

        match outcome {
            Ok(result) => {
                match &result.outcome {
                    ConversionOutcome::Rendered(page) => {
                        cb.on_unit_complete(label, total, page.len())
                    }
                    ConversionOutcome::Failed(e) => {
                        warn!("{}; dropping it from the batch", e);
                        cb.on_unit_error(label, total, &e.to_string());
                    }
                }
                results.push(result);
            }
            Err(err) => {
                return UnitRun {
                    results,
                    aborted: Some(err),
                }
            }
        }

        if !config.unit_pacing.is_zero() {
            tokio::time::sleep(config.unit_pacing).await;
        }
    }

    UnitRun {
        results,
        aborted: None,
    }
}

/// Store whatever rendered before an abort. Failures here are logged only:
/// the batch is already failing with a more useful error.
async fn salvage(
    job: &BatchJob,
    assembler: &ArtifactAssembler,
    results: &[UnitResult],
) -> Option<ArtifactHandle> {
    let pages: Vec<Vec<u8>> = results
        .iter()
        .filter_map(|r| r.page().map(<[u8]>::to_vec))
        .collect();
    if pages.is_empty() {
        return None;
    }

    let count = pages.len();
    match assembler.assemble(&format!("{}_partial", job.name), pages).await {
        Ok(handle) => {
            info!(
                "Job {}: salvaged {} rendered labels into {}",
                job.id, count, handle.filename
            );
            Some(handle)
        }
        Err(e) => {
            warn!("Job {}: could not salvage partial output: {}", job.id, e);
            None
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn rendered_pages(results: Vec<UnitResult>) -> Vec<Vec<u8>> {
    results
        .into_iter()
        .filter_map(|r| match r.outcome {
            ConversionOutcome::Rendered(page) => Some(page),
            ConversionOutcome::Failed(_) => None,
        })
        .collect()
}

fn no_labels_rendered(results: &[UnitResult], config: &ConversionConfig) -> ZplError {
    let first_error = results
        .iter()
        .find_map(UnitResult::error)
        .map(|e| e.to_string())
        .unwrap_or_else(|| "Unknown error".to_string());
    ZplError::NoLabelsRendered {
        total: results.len(),
        attempts: config.retry.max_attempts,
        first_error,
    }
}

fn callback(config: &ConversionConfig) -> ProgressCallback {
    config
        .progress_callback
        .clone()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback))
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Resolve the renderer: a pre-built one from the config, else Labelary.
pub(crate) fn resolve_renderer(
    config: &ConversionConfig,
) -> Result<Arc<dyn LabelRenderer>, ZplError> {
    if let Some(ref renderer) = config.renderer {
        return Ok(Arc::clone(renderer));
    }
    let renderer = LabelaryRenderer::new(&config.endpoint, config.request_timeout_secs)?;
    debug!("Rendering via {}", renderer.url());
    Ok(Arc::new(renderer))
}

/// Resolve the page merger: a pre-built one from the config, else pdfium.
pub(crate) fn resolve_merger(config: &ConversionConfig) -> Arc<dyn PageMerger> {
    match config.merger {
        Some(ref merger) => Arc::clone(merger),
        None => Arc::new(PdfiumMerger::new(config.pdfium_lib_path.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnitError;
    use crate::pipeline::assemble::ArtifactStore;
    use crate::pipeline::render::{RenderFailure, RenderResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Renders every unit as its own text, except units containing `FAIL`
    /// (always 500) or `ABORT` (fatal).
    struct EchoRenderer;

    #[async_trait]
    impl LabelRenderer for EchoRenderer {
        fn name(&self) -> &str {
            "echo"
        }

        async fn render(&self, zpl: &str) -> Result<RenderResponse, RenderFailure> {
            if zpl.contains("PANIC") {
                panic!("renderer bug");
            } else if zpl.contains("ABORT") {
                Err(RenderFailure::Fatal("endpoint rejected request".into()))
            } else if zpl.contains("FAIL") {
                Ok(RenderResponse::status(500))
            } else {
                Ok(RenderResponse::ok(zpl.as_bytes().to_vec()))
            }
        }
    }

    struct JoinMerger;

    impl PageMerger for JoinMerger {
        fn merge(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>, ZplError> {
            Ok(pages.join(&b'|'))
        }
    }

    #[derive(Default)]
    struct Recorder {
        phases: Mutex<Vec<JobStatus>>,
        failed: Mutex<Option<(String, Option<String>)>>,
        completed: Mutex<Option<ConversionStats>>,
    }

    impl BatchProgressCallback for Recorder {
        fn on_phase(&self, status: JobStatus) {
            self.phases.lock().unwrap().push(status);
        }

        fn on_conversion_complete(
            &self,
            stats: &ConversionStats,
            _artifact: Option<&ArtifactHandle>,
        ) {
            *self.completed.lock().unwrap() = Some(stats.clone());
        }

        fn on_conversion_failed(
            &self,
            _stats: &ConversionStats,
            reason: &str,
            salvaged: Option<&ArtifactHandle>,
        ) {
            *self.failed.lock().unwrap() =
                Some((reason.to_string(), salvaged.map(|h| h.filename.clone())));
        }
    }

    fn config(recorder: Arc<Recorder>) -> ConversionConfig {
        ConversionConfig::builder()
            .renderer(Arc::new(EchoRenderer))
            .merger(Arc::new(JoinMerger))
            .unit_pacing(Duration::ZERO)
            .progress_callback(recorder)
            .build()
            .unwrap()
    }

    fn job(labels: &[&str]) -> BatchJob {
        BatchJob::new("batch", labels.iter().map(|l| LabelUnit::from(*l)).collect())
    }

    #[tokio::test]
    async fn batch_drops_failed_units_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let assembler = ArtifactAssembler::new(Arc::new(JoinMerger), store.clone());
        let recorder = Arc::new(Recorder::default());

        let out = convert_batch(&job(&["A", "FAIL", "C"]), &config(recorder.clone()), &assembler)
            .await
            .unwrap();

        assert_eq!(out.stats.rendered_units, 2);
        assert_eq!(out.stats.failed_units, 1);
        assert_eq!(store.open(&out.artifact.filename).await.unwrap(), b"A|C");
        assert_eq!(
            *recorder.phases.lock().unwrap(),
            vec![JobStatus::Converting, JobStatus::Finalizing]
        );
        assert!(recorder.completed.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn batch_with_nothing_rendered_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let assembler =
            ArtifactAssembler::new(Arc::new(JoinMerger), ArtifactStore::new(dir.path()).unwrap());
        let recorder = Arc::new(Recorder::default());

        let err = convert_batch(&job(&["FAIL 1", "FAIL 2"]), &config(recorder.clone()), &assembler)
            .await
            .unwrap_err();

        assert!(matches!(err, ZplError::NoLabelsRendered { total: 2, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        let (reason, salvaged) = recorder.failed.lock().unwrap().clone().unwrap();
        assert!(reason.contains("all 2 labels"));
        assert!(salvaged.is_none());
    }

    #[tokio::test]
    async fn abort_salvages_rendered_pages() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let assembler = ArtifactAssembler::new(Arc::new(JoinMerger), store.clone());
        let recorder = Arc::new(Recorder::default());

        let err = convert_batch(
            &job(&["A", "B", "ABORT", "D"]),
            &config(recorder.clone()),
            &assembler,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ZplError::RendererAborted { label: 3, .. }));
        let (_, salvaged) = recorder.failed.lock().unwrap().clone().unwrap();
        let salvaged = salvaged.expect("partial artifact");
        assert!(salvaged.starts_with("batch_partial_"));
        assert_eq!(store.open(&salvaged).await.unwrap(), b"A|B");
    }

    #[tokio::test]
    async fn renderer_panic_is_salvaged_like_an_abort() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let assembler = ArtifactAssembler::new(Arc::new(JoinMerger), store.clone());
        let recorder = Arc::new(Recorder::default());

        let err = convert_batch(&job(&["A", "PANIC"]), &config(recorder.clone()), &assembler)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("renderer bug"), "got: {err}");
        let (_, salvaged) = recorder.failed.lock().unwrap().clone().unwrap();
        assert_eq!(store.open(&salvaged.unwrap()).await.unwrap(), b"A");
    }

    struct BrokenMerger;

    impl PageMerger for BrokenMerger {
        fn merge(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>, ZplError> {
            Err(ZplError::MergeFailed {
                pages: pages.len(),
                detail: "corrupt page".into(),
            })
        }
    }

    #[tokio::test]
    async fn merge_failure_is_reported_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let assembler =
            ArtifactAssembler::new(Arc::new(BrokenMerger), ArtifactStore::new(dir.path()).unwrap());
        let recorder = Arc::new(Recorder::default());

        let err = convert_batch(&job(&["A", "B"]), &config(recorder.clone()), &assembler)
            .await
            .unwrap_err();

        assert!(matches!(err, ZplError::MergeFailed { pages: 2, .. }));
        let (reason, salvaged) = recorder.failed.lock().unwrap().clone().unwrap();
        assert!(reason.contains("corrupt page"), "{reason}");
        assert!(salvaged.is_none());
        assert!(recorder.completed.lock().unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unbuildable_renderer_is_reported_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let assembler =
            ArtifactAssembler::new(Arc::new(JoinMerger), ArtifactStore::new(dir.path()).unwrap());
        let recorder = Arc::new(Recorder::default());
        let mut config = config(recorder.clone());
        config.renderer = None;
        config.endpoint.base_url = "not a url".into();

        let err = convert_batch(&job(&["A"]), &config, &assembler)
            .await
            .unwrap_err();

        assert!(matches!(err, ZplError::InvalidConfig(_)));
        let (reason, _) = recorder.failed.lock().unwrap().clone().unwrap();
        assert!(reason.contains("not a url"), "{reason}");
        assert!(recorder.phases.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_follows_every_unit() {
        let dir = tempfile::tempdir().unwrap();
        let assembler =
            ArtifactAssembler::new(Arc::new(JoinMerger), ArtifactStore::new(dir.path()).unwrap());
        let config = ConversionConfig::builder()
            .renderer(Arc::new(EchoRenderer))
            .unit_pacing(Duration::from_millis(500))
            .build()
            .unwrap();

        let origin = tokio::time::Instant::now();
        convert_batch(&job(&["A", "FAIL", "C"]), &config, &assembler)
            .await
            .unwrap();
        assert_eq!(origin.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn submission_in_memory_reports_reading_and_analyzing() {
        let recorder = Arc::new(Recorder::default());
        let out = convert_submission(
            Submission::Text("^XA^FDone^XZ\n^XA^FDtwo^XZ".into()),
            &config(recorder.clone()),
        )
        .await
        .unwrap();

        assert_eq!(out.pdf, b"^XA^FDone^XZ|^XA^FDtwo^XZ");
        assert_eq!(out.units.len(), 2);
        assert_eq!(
            *recorder.phases.lock().unwrap(),
            vec![
                JobStatus::Reading,
                JobStatus::Analyzing,
                JobStatus::Converting,
                JobStatus::Finalizing
            ]
        );
    }

    #[tokio::test]
    async fn submission_without_labels_is_rejected() {
        let err = convert_submission(
            Submission::Text("just some text, no markup".into()),
            &config(Arc::new(Recorder::default())),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ZplError::NoLabelsFound));
    }

    #[tokio::test]
    async fn failed_units_are_reported_per_label() {
        let recorder = Arc::new(Recorder::default());
        let out = convert_submission(
            Submission::Text("^XA^FDok^XZ^XA^FDFAIL^XZ".into()),
            &config(recorder),
        )
        .await
        .unwrap();

        assert!(out.units[0].is_rendered());
        assert!(matches!(
            out.units[1].error(),
            Some(UnitError::RetriesExhausted { label: 2, attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn convert_to_file_writes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.zpl");
        let output = dir.path().join("out/labels.pdf");
        std::fs::write(&input, "^XA^FDhello^FS^XZ").unwrap();

        let stats = convert_to_file(&input, &output, &config(Arc::new(Recorder::default())))
            .await
            .unwrap();

        assert_eq!(stats.rendered_units, 1);
        assert_eq!(std::fs::read(&output).unwrap(), b"^XA^FDhello^FS^XZ");
        assert!(!output.with_extension("pdf.tmp").exists());
    }
}
