//! CLI binary for zpl2pdf.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig` / `ServerSettings` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use zpl2pdf::{
    convert_to_file, ArtifactHandle, BatchProgressCallback, ConversionConfig, ConversionStats,
    JobStatus, ProgressCallback,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per label.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start of the label currently being rendered.
    label_started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` tells us how many labels there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            label_started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} labels  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rendering");
        self.bar.reset_eta();
    }

    fn label_elapsed_secs(&self) -> f64 {
        self.label_started
            .lock()
            .ok()
            .and_then(|mut started| started.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_phase(&self, status: JobStatus) {
        match status {
            JobStatus::Analyzing => self.bar.set_message("Splitting labels…"),
            JobStatus::Finalizing => {
                self.bar.set_prefix("Merging");
                self.bar.set_message("Building PDF…");
            }
            _ => {}
        }
    }

    fn on_conversion_start(&self, total_units: usize) {
        self.activate_bar(total_units);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rendering {total_units} labels…"))
        ));
    }

    fn on_unit_start(&self, label: usize, _total: usize) {
        if let Ok(mut started) = self.label_started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_message(format!("label {label}"));
    }

    fn on_unit_complete(&self, label: usize, total: usize, page_bytes: usize) {
        self.bar.println(format!(
            "  {} Label {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            label,
            total,
            dim(&format!("{:>6} bytes", page_bytes)),
            dim(&format!("{:.1}s", self.label_elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_unit_error(&self, label: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Keep output tidy.
        let msg = match error.char_indices().nth(79) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };

        self.bar.println(format!(
            "  {} Label {:>3}/{:<3}  {}  {}",
            red("✗"),
            label,
            total,
            red(&msg),
            dim(&format!("{:.1}s", self.label_elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, stats: &ConversionStats, _artifact: Option<&ArtifactHandle>) {
        self.bar.finish_and_clear();
        if stats.failed_units == 0 {
            eprintln!(
                "{} {} labels rendered",
                green("✔"),
                bold(&stats.rendered_units.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} labels rendered  ({} dropped)",
                cyan("⚠"),
                bold(&stats.rendered_units.to_string()),
                stats.total_units,
                red(&self.errors.load(Ordering::SeqCst).to_string()),
            );
        }
    }

    fn on_conversion_failed(
        &self,
        stats: &ConversionStats,
        _reason: &str,
        _salvaged: Option<&ArtifactHandle>,
    ) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {}/{} labels rendered",
            red("✘"),
            stats.rendered_units,
            stats.total_units
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a ZPL file (writes labels.pdf next to it)
  zpl2pdf convert labels.zpl

  # Convert a ZIP export to a chosen path, 4x3 inch labels at 12 dpmm
  zpl2pdf convert export.zip -o out/batch.pdf --size 4x3 --dpmm 12

  # Run the web service on all interfaces, keeping results for a day
  zpl2pdf serve --bind 0.0.0.0:5000 --retention-secs 86400

ENVIRONMENT VARIABLES:
  ZPL2PDF_ENDPOINT        Rendering API root (default http://api.labelary.com/v1)
  ZPL2PDF_OUTPUT_DIR      Where `serve` stores merged PDFs (default downloads)
  PDFIUM_LIB_PATH         Path to libpdfium used for merging pages
  RUST_LOG                Log filter, overrides -v / -q
"#;

/// Convert ZPL label batches to a single PDF.
#[derive(Parser, Debug)]
#[command(
    name = "zpl2pdf",
    version,
    about = "Convert ZPL label batches into one PDF via the Labelary API",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "ZPL2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "ZPL2PDF_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a .zpl, .txt or .zip file to a PDF.
    Convert(ConvertArgs),
    /// Serve the upload / status / download HTTP interface.
    #[cfg(feature = "server")]
    Serve(ServeArgs),
}

/// Rendering options shared by both subcommands.
#[derive(Args, Debug)]
struct RenderArgs {
    /// Print density in dots per millimetre (6, 8, 12, 24).
    #[arg(long, env = "ZPL2PDF_DPMM", default_value_t = 8)]
    dpmm: u8,

    /// Label size in inches, WIDTHxHEIGHT.
    #[arg(long, env = "ZPL2PDF_SIZE", default_value = "4x6", value_parser = parse_size)]
    size: (f32, f32),

    /// Label index passed to the renderer.
    #[arg(long, env = "ZPL2PDF_INDEX", default_value_t = 0)]
    index: u32,

    /// Rendering API root.
    #[arg(long, env = "ZPL2PDF_ENDPOINT", default_value = "http://api.labelary.com/v1")]
    endpoint: String,

    /// Attempts per label before it is dropped.
    #[arg(long, env = "ZPL2PDF_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Pause after every label, in milliseconds.
    #[arg(long, env = "ZPL2PDF_PACING_MS", default_value_t = 500)]
    pacing_ms: u64,

    /// Per-request timeout in seconds.
    #[arg(long, env = "ZPL2PDF_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Path to libpdfium (otherwise PDFIUM_LIB_PATH or the system library).
    #[arg(long, env = "ZPL2PDF_PDFIUM")]
    pdfium: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Input file: .zpl, .txt or .zip.
    input: PathBuf,

    /// Write the PDF here. Default: the input path with a .pdf extension.
    #[arg(short, long, env = "ZPL2PDF_OUTPUT")]
    output: Option<PathBuf>,

    /// Print conversion stats as JSON on stdout.
    #[arg(long, env = "ZPL2PDF_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "ZPL2PDF_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    render: RenderArgs,
}

#[cfg(feature = "server")]
#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen address.
    #[arg(long, env = "ZPL2PDF_BIND", default_value = "127.0.0.1:5000")]
    bind: std::net::SocketAddr,

    /// Directory for merged PDFs.
    #[arg(long, env = "ZPL2PDF_OUTPUT_DIR", default_value = "downloads")]
    output_dir: PathBuf,

    /// Batches converting at the same time.
    #[arg(long, env = "ZPL2PDF_MAX_JOBS", default_value_t = 4)]
    max_jobs: usize,

    /// Forget finished jobs and delete their PDFs after this many seconds.
    /// Unset keeps everything.
    #[arg(long, env = "ZPL2PDF_RETENTION_SECS")]
    retention_secs: Option<u64>,

    #[command(flatten)]
    render: RenderArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are noise next to the progress bar.
    let show_progress = match &cli.command {
        Command::Convert(args) => !cli.quiet && !args.no_progress && !args.json,
        #[cfg(feature = "server")]
        Command::Serve(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Convert(ref args) => run_convert(args, cli.quiet, show_progress).await,
        #[cfg(feature = "server")]
        Command::Serve(ref args) => run_serve(args).await,
    }
}

async fn run_convert(args: &ConvertArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let config = build_config(&args.render, progress_cb)?;
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.input));

    let stats = convert_to_file(&args.input, &output_path, &config)
        .await
        .with_context(|| format!("Conversion of {} failed", args.input.display()))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("Failed to serialise stats")?
        );
    }

    if !quiet {
        eprintln!(
            "{}  {}/{} labels  {}ms  →  {}",
            if stats.failed_units == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.rendered_units,
            stats.total_units,
            stats.duration_ms,
            bold(&output_path.display().to_string()),
        );
        if stats.failed_units > 0 {
            eprintln!(
                "   {}",
                dim(&format!(
                    "{} labels dropped after {} attempts each",
                    stats.failed_units, config.retry.max_attempts
                ))
            );
        }
    }

    Ok(())
}

#[cfg(feature = "server")]
async fn run_serve(args: &ServeArgs) -> Result<()> {
    use zpl2pdf::{JobService, ServerSettings};

    let mut config = build_config(&args.render, None)?;
    config.output_dir = args.output_dir.clone();

    let settings = ServerSettings {
        bind: args.bind,
        max_concurrent_jobs: args.max_jobs,
        retention: args.retention_secs.map(Duration::from_secs),
    };

    let service = JobService::new(config, &settings).context("Failed to start job service")?;
    tracing::info!(
        "Storing PDFs in {} ({} concurrent batches)",
        service.store().root().display(),
        settings.max_concurrent_jobs
    );

    zpl2pdf::server::serve(Arc::new(service), &settings)
        .await
        .with_context(|| format!("Server on {} failed", settings.bind))
}

/// Map CLI args to `ConversionConfig`.
fn build_config(render: &RenderArgs, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let (width, height) = render.size;
    let mut builder = ConversionConfig::builder()
        .endpoint_url(&render.endpoint)
        .dpmm(render.dpmm)
        .label_size(width, height)
        .label_index(render.index)
        .max_attempts(render.max_retries)
        .unit_pacing(Duration::from_millis(render.pacing_ms))
        .request_timeout_secs(render.timeout);

    if let Some(ref path) = render.pdfium {
        builder = builder.pdfium_lib_path(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn default_output(input: &Path) -> PathBuf {
    input.with_extension("pdf")
}

/// Parse `--size` as `WIDTHxHEIGHT` in inches.
fn parse_size(s: &str) -> Result<(f32, f32), String> {
    let (w, h) = s
        .trim()
        .to_lowercase()
        .split_once('x')
        .map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;

    let w: f32 = w.parse().map_err(|_| format!("invalid width '{w}'"))?;
    let h: f32 = h.parse().map_err(|_| format!("invalid height '{h}'"))?;
    if !(w > 0.0 && h > 0.0) {
        return Err(format!("label size must be positive, got '{s}'"));
    }
    Ok((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_accepts_common_forms() {
        assert_eq!(parse_size("4x6"), Ok((4.0, 6.0)));
        assert_eq!(parse_size(" 2.25 X 1.25 "), Ok((2.25, 1.25)));
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(parse_size("4by6").is_err());
        assert!(parse_size("0x6").is_err());
        assert!(parse_size("ax6").is_err());
    }

    #[test]
    fn default_output_swaps_extension() {
        assert_eq!(
            default_output(Path::new("batches/export.zip")),
            PathBuf::from("batches/export.pdf")
        );
    }

    #[test]
    fn cli_parses_convert_flags() {
        let cli = Cli::try_parse_from([
            "zpl2pdf", "convert", "in.zpl", "-o", "out.pdf", "--dpmm", "12", "--size", "4x3",
        ])
        .unwrap();
        match cli.command {
            Command::Convert(args) => {
                assert_eq!(args.output, Some(PathBuf::from("out.pdf")));
                assert_eq!(args.render.dpmm, 12);
                assert_eq!(args.render.size, (4.0, 3.0));
                assert_eq!(args.render.max_retries, 3);
            }
            #[cfg(feature = "server")]
            _ => panic!("expected convert"),
        }
    }
}
