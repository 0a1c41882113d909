//! CLI binary for mdify.
//!
//! A thin shim over the library crate: maps flags to `ServiceConfig` and
//! `ConversionOptions`, runs the batch inside a scoped service, prints a
//! summary and picks the exit code.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mdify::{
    convert_batch, BatchProgressCallback, BatchSummary, CliEngine, ContainerEngine,
    ContainerRuntime, ConversionClient, ConversionMode, ConversionOptions, FileJob, MdifyError,
    ProgressCallback, PullPolicy, ServiceConfig, ServiceManager, DEFAULT_IMAGE, GPU_IMAGE,
};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One spinner line showing the file in flight; finished files are printed
/// above it.
struct CliProgressCallback {
    bar: ProgressBar,
    file_started: Mutex<Option<Instant>>,
    succeeded: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        Arc::new(Self {
            bar,
            file_started: Mutex::new(None),
            succeeded: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        })
    }

    fn file_elapsed(&self) -> String {
        let secs = self
            .file_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        format_duration(secs)
    }

    /// Counts so far, for the interrupt message.
    fn partial(&self) -> (usize, usize, usize) {
        (
            self.succeeded.load(Ordering::SeqCst),
            self.failed.load(Ordering::SeqCst),
            self.skipped.load(Ordering::SeqCst),
        )
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_service_starting(&self, image: &str) {
        self.bar.set_prefix("Starting");
        self.bar.set_message(format!("docling-serve ({image})"));
    }

    fn on_service_ready(&self, elapsed: Duration) {
        self.bar.println(format!(
            "{} Service ready {}",
            green("✓"),
            dim(&format!("({})", format_duration(elapsed.as_secs_f64())))
        ));
    }

    fn on_batch_start(&self, _total_files: usize) {
        self.bar.set_prefix("Converting");
        self.bar.reset_elapsed();
    }

    fn on_file_start(&self, index: usize, total: usize, input: &Path) {
        if let Ok(mut t) = self.file_started.lock() {
            *t = Some(Instant::now());
        }
        let size = std::fs::metadata(input).map(|m| m.len()).unwrap_or(0);
        self.bar.set_message(format!(
            "[{index}/{total}] {} {}",
            display_name(input),
            dim(&format!("({})", format_size(size)))
        ));
        self.bar.reset_elapsed();
    }

    fn on_file_skipped(&self, index: usize, total: usize, input: &Path) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  [{index}/{total}] Skipped (exists): {}",
            display_name(input)
        ));
    }

    fn on_file_complete(&self, index: usize, total: usize, input: &Path, content_len: usize) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} [{index}/{total}] {}  {}  {}",
            green("✓"),
            display_name(input),
            dim(&format!("{content_len:>6} chars")),
            dim(&self.file_elapsed()),
        ));
    }

    fn on_file_error(&self, index: usize, total: usize, input: &Path, error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let msg = truncate(error, 100);
        self.bar.println(format!(
            "  {} [{index}/{total}] {}  {}\n      {}",
            red("✗"),
            display_name(input),
            dim(&self.file_elapsed()),
            red(&msg),
        ));
    }

    fn on_batch_complete(&self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a single file into ./output/
  mdify document.pdf

  # Several files, custom output directory, replace existing results
  mdify docs/*.pdf slides.pptx -o out/ --overwrite

  # Use Podman and the GPU image
  mdify --runtime podman --gpu scan.png

  # Long documents through the async task API
  mdify --async-tasks --timeout 3600 thesis.pdf

CONTAINER:
  The docling-serve image is pulled on first use (--pull missing) and run
  as a detached, self-removing container named mdify-serve-<id>. Instances
  left behind by a crashed run are stopped before a new one starts, and the
  container is always stopped on exit, including on Ctrl-C.

ENVIRONMENT VARIABLES:
  MDIFY_TIMEOUT   Conversion timeout in seconds (default: 1200)
  MDIFY_IMAGE     Container image override
  MDIFY_PORT      Host port (default: 5001)
  RUST_LOG        Log filter override, e.g. mdify=debug

EXIT STATUS:
  0  all files converted or skipped
  1  at least one file failed, or a fatal error
  2  no container runtime found
  130 interrupted
"#;

/// Convert documents to Markdown through a docling-serve container.
#[derive(Parser, Debug)]
#[command(
    name = "mdify",
    version,
    about = "Convert documents to Markdown using docling-serve (via container)",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input files (PDF, DOCX, PPTX, HTML, images, audio, …).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory for converted files.
    #[arg(short, long = "out-dir", env = "MDIFY_OUT_DIR", default_value = "output")]
    out_dir: PathBuf,

    /// Overwrite existing output files.
    #[arg(long)]
    overwrite: bool,

    /// Container runtime (auto-detects docker, then podman, if not set).
    #[arg(long, value_enum)]
    runtime: Option<RuntimeArg>,

    /// Container image to use.
    #[arg(long, env = "MDIFY_IMAGE", default_value = DEFAULT_IMAGE)]
    image: String,

    /// Use the GPU-accelerated image (docling-serve-cu126). Overrides --image.
    #[arg(long)]
    gpu: bool,

    /// Image pull policy.
    #[arg(long, value_enum, default_value = "missing")]
    pull: PullArg,

    /// Host port for the docling-serve container.
    #[arg(long, env = "MDIFY_PORT", default_value_t = 5001)]
    port: u16,

    /// Conversion timeout in seconds.
    #[arg(long, env = "MDIFY_TIMEOUT", default_value_t = 1200)]
    timeout: u64,

    /// Seconds to wait for the container to become healthy.
    #[arg(long, default_value_t = 120)]
    startup_timeout: u64,

    /// Output format requested from the service.
    #[arg(long, default_value = "md")]
    to_format: String,

    /// Disable OCR.
    #[arg(long)]
    no_ocr: bool,

    /// Submit through the async task API and poll for results.
    #[arg(long)]
    async_tasks: bool,

    /// Suppress progress output.
    #[arg(short, long)]
    quiet: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RuntimeArg {
    Docker,
    Podman,
}

impl From<RuntimeArg> for ContainerRuntime {
    fn from(v: RuntimeArg) -> Self {
        match v {
            RuntimeArg::Docker => ContainerRuntime::Docker,
            RuntimeArg::Podman => ContainerRuntime::Podman,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PullArg {
    Always,
    Missing,
    Never,
}

impl From<PullArg> for PullPolicy {
    fn from(v: PullArg) -> Self {
        match v {
            PullArg::Always => PullPolicy::Always,
            PullArg::Missing => PullPolicy::Missing,
            PullArg::Never => PullPolicy::Never,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner already reports every file; keep library INFO logs out of
    // its way unless --verbose asks for everything.
    let show_progress = !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if show_progress {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", red("Error:"));
            match e.downcast_ref::<MdifyError>() {
                Some(MdifyError::RuntimeNotFound { .. }) => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let jobs = build_jobs(&cli.inputs, &cli.out_dir)?;

    // ── Container engine ─────────────────────────────────────────────────
    let preferred = cli.runtime.map(ContainerRuntime::from).unwrap_or_default();
    let engine = CliEngine::detect(preferred, cli.runtime.is_some()).await?;

    let image = selected_image(&cli);
    let config = ServiceConfig::builder()
        .image(image.clone())
        .port(cli.port)
        .conversion_timeout_secs(cli.timeout)
        .readiness_timeout_secs(cli.startup_timeout)
        .pull_policy(cli.pull.into())
        .build()
        .context("Invalid configuration")?;

    if !cli.quiet {
        let total_size: u64 = jobs
            .iter()
            .filter_map(|j| std::fs::metadata(&j.input).ok())
            .map(|m| m.len())
            .sum();
        eprintln!(
            "Found {} file(s) to convert ({})",
            jobs.len(),
            format_size(total_size)
        );
        eprintln!("Using runtime: {}", engine.name());
        eprintln!("Using image:   {image}\n");
    }

    // ── Progress + options ───────────────────────────────────────────────
    let progress = (!cli.quiet).then(CliProgressCallback::new);
    let progress_cb: Option<ProgressCallback> = progress
        .clone()
        .map(|cb| cb as Arc<dyn BatchProgressCallback>);

    let options = ConversionOptions {
        to_format: cli.to_format.clone(),
        do_ocr: !cli.no_ocr,
        mode: if cli.async_tasks {
            ConversionMode::AsyncTask
        } else {
            ConversionMode::Sync
        },
        task_timeout_secs: cli.timeout,
        overwrite: cli.overwrite,
        progress_callback: progress_cb.clone(),
        ..ConversionOptions::default()
    };

    // Requests may take as long as the service is allowed to work, plus slack.
    let client = ConversionClient::with_request_timeout(Some(Duration::from_secs(
        cli.timeout.saturating_add(60),
    )))?;

    let mut manager = ServiceManager::new(Arc::new(engine), config)?.with_progress(progress_cb);

    // ── Run ──────────────────────────────────────────────────────────────
    let outcome = manager
        .run_scoped(tokio::signal::ctrl_c(), |base_url| {
            let client = &client;
            let jobs = &jobs;
            let options = &options;
            async move { convert_batch(client, &base_url, jobs, options).await }
        })
        .await;

    let summary = match outcome {
        Ok(summary) => summary,
        Err(MdifyError::Interrupted) => {
            if let Some(ref p) = progress {
                p.bar.finish_and_clear();
                let (ok, failed, skipped) = p.partial();
                eprintln!("\n\nInterrupted by user. Container stopped.");
                if ok + failed + skipped > 0 {
                    eprintln!(
                        "Partial progress: {ok} successful, {failed} failed, {skipped} skipped"
                    );
                }
            }
            return Ok(ExitCode::from(130));
        }
        Err(e) => {
            if let Some(ref p) = progress {
                p.bar.finish_and_clear();
            }
            return Err(e).context("Service failed to start");
        }
    };

    if !cli.quiet {
        print_summary(&summary);
    }
    Ok(ExitCode::from(summary.exit_code()))
}

/// `--gpu` wins over `--image` and `MDIFY_IMAGE`.
fn selected_image(cli: &Cli) -> String {
    if cli.gpu {
        GPU_IMAGE.to_string()
    } else {
        cli.image.clone()
    }
}

/// One job per input file, each written to `<out_dir>/<stem>.md`.
fn build_jobs(inputs: &[PathBuf], out_dir: &Path) -> Result<Vec<FileJob>> {
    let out_dir = std::path::absolute(out_dir)
        .with_context(|| format!("Cannot resolve output directory {}", out_dir.display()))?;

    inputs
        .iter()
        .map(|input| {
            let path = std::fs::canonicalize(input)
                .with_context(|| format!("Input path does not exist: {}", input.display()))?;
            if !path.is_file() {
                anyhow::bail!(
                    "Not a file: {} (pass files, e.g. {}/*.pdf)",
                    path.display(),
                    input.display()
                );
            }
            Ok(FileJob::into_dir(path, &out_dir))
        })
        .collect()
}

fn print_summary(summary: &BatchSummary) {
    let rule = "=".repeat(50);
    eprintln!();
    eprintln!("{rule}");
    eprintln!("{}", bold("Conversion Summary:"));
    eprintln!("  Total files:     {}", summary.total());
    eprintln!("  Successful:      {}", green(&summary.succeeded().to_string()));
    eprintln!("  Skipped:         {}", summary.skipped());
    let failed = summary.failed();
    let failed_str = failed.to_string();
    eprintln!(
        "  Failed:          {}",
        if failed > 0 { red(&failed_str) } else { failed_str }
    );
    eprintln!(
        "  Total time:      {}",
        format_duration(summary.total_duration_ms as f64 / 1000.0)
    );
    eprintln!("{rule}");
}

// ── Formatting helpers ───────────────────────────────────────────────────────

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max - 1).collect();
    format!("{cut}\u{2026}")
}

fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return if unit == "B" {
                format!("{bytes} B")
            } else {
                format!("{size:.1} {unit}")
            };
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        return format!("{secs:.1}s");
    }
    let minutes = (secs / 60.0) as u64;
    let rem = secs % 60.0;
    if minutes < 60 {
        return format!("{minutes}m {rem:.0}s");
    }
    format!("{}h {}m {rem:.0}s", minutes / 60, minutes % 60)
}
