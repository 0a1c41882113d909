//! # mdify
//!
//! Convert documents (PDF, images, office formats, audio) to Markdown by
//! delegating to a [docling-serve] container.
//!
//! The heavy lifting (OCR, layout analysis, table structure) happens inside
//! the container image. This crate owns the two parts around it:
//!
//! * **Service lifecycle**: sweep stale instances from crashed runs, launch
//!   a detached container on a local port, poll `/health` until ready, and
//!   stop it on every exit path.
//! * **Conversion client**: upload one file over HTTP and pull the
//!   Markdown out of whichever response layout the service uses.
//!
//! ## Flow
//!
//! ```text
//! files ──▶ ServiceManager::run_scoped
//!             ├─ sweep  stop stale mdify-serve-* instances
//!             ├─ launch <engine> run -d --rm … <image>
//!             ├─ wait   GET /health every 2s until 200
//!             ├─ work   convert_batch: POST /v1/convert/file per file
//!             └─ stop   always, including Ctrl-C and panics
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mdify::{
//!     convert_batch, CliEngine, ContainerRuntime, ConversionClient, ConversionOptions,
//!     FileJob, ServiceConfig, ServiceManager,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = CliEngine::detect(ContainerRuntime::Docker, false).await?;
//!     let mut manager = ServiceManager::new(Arc::new(engine), ServiceConfig::default())?;
//!
//!     let jobs = vec![FileJob::into_dir("report.pdf", Path::new("output"))];
//!     let client = ConversionClient::new()?;
//!     let options = ConversionOptions::default();
//!
//!     let summary = manager
//!         .run_scoped(tokio::signal::ctrl_c(), |base_url| async move {
//!             convert_batch(&client, &base_url, &jobs, &options).await
//!         })
//!         .await?;
//!     eprintln!("{} converted, {} failed", summary.succeeded(), summary.failed());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mdify` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! [docling-serve]: https://github.com/docling-project/docling-serve

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod progress;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::ConversionClient;
pub use config::{
    ContainerRuntime, ConversionMode, ConversionOptions, PullPolicy, ServiceConfig,
    ServiceConfigBuilder, DEFAULT_IMAGE, GPU_IMAGE,
};
pub use convert::{convert_batch, write_atomic};
pub use error::MdifyError;
pub use output::{
    AsyncTaskHandle, BatchSummary, ConversionRequest, ConversionResult, FileJob, FileReport,
    TaskStatus,
};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use service::{CliEngine, ContainerEngine, RunSpec, ServiceHandle, ServiceManager, ServiceState};
