//! Error types for the mdify library.
//!
//! Failures fall into two groups:
//!
//! * **Lifecycle errors**: the service could not be brought up at all
//!   (no container engine, image missing, launch failed, never healthy).
//!   These abort the whole run and are returned as `Err(MdifyError)` from
//!   [`crate::service::ServiceManager::start`] and friends.
//!
//! * **Per-file errors**: one document failed (HTTP 5xx, unreadable file,
//!   output not writable). The batch driver folds these into a failed
//!   [`crate::output::ConversionResult`] inside the file's
//!   [`crate::output::FileReport`] so the remaining files still run.
//!
//! The HTTP client itself returns `Err` for hard protocol failures and
//! `Ok(ConversionResult { success: false, .. })` for transport failures on
//! the synchronous path; see [`crate::client::ConversionClient::convert_file`].

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the mdify library.
#[derive(Debug, Error)]
pub enum MdifyError {
    // ── Container engine ──────────────────────────────────────────────────
    /// Neither docker nor podman answered `--version`.
    #[error("Container runtime not found (tried: {tried})\nPlease install Docker or Podman to use mdify.")]
    RuntimeNotFound { tried: String },

    /// Pull policy is `never` and the image is not present locally.
    #[error("Image not found locally: {image}\nRun with --pull=missing or pull it manually: {runtime} pull {image}")]
    ImageNotFound { runtime: String, image: String },

    /// `<runtime> pull` exited non-zero.
    #[error("Failed to pull image '{image}': {detail}")]
    ImagePullFailed { image: String, detail: String },

    /// The engine refused to start the service instance.
    #[error("Failed to start container '{name}' with {runtime}: {detail}")]
    LaunchFailed {
        runtime: String,
        name: String,
        detail: String,
    },

    /// A container engine command other than `run` failed.
    #[error("'{runtime} {command}' failed: {detail}")]
    EngineCommand {
        runtime: String,
        command: String,
        detail: String,
    },

    /// The service never answered `/health` with 200 within the bound.
    #[error("Container failed to become healthy within {secs}s\nIncrease --startup-timeout or check `{runtime} logs {name}`.")]
    HealthTimeout {
        runtime: String,
        name: String,
        secs: u64,
    },

    // ── HTTP ──────────────────────────────────────────────────────────────
    /// The service answered with a non-200 status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection refused, reset, or timed out at the network layer.
    #[error("Request to '{url}' failed: {detail}")]
    Transport { url: String, detail: String },

    /// A 200 response that lacks a field the call cannot do without.
    #[error("Malformed response from '{url}': {detail}")]
    MalformedResponse { url: String, detail: String },

    /// An async task reported `failed`.
    #[error("Conversion task {task_id} failed: {detail}")]
    TaskFailed { task_id: String, detail: String },

    /// An async task was still running when the wait bound elapsed.
    #[error("Conversion task {task_id} did not finish within {secs}s")]
    TaskTimeout { task_id: String, secs: u64 },

    // ── I/O ───────────────────────────────────────────────────────────────
    /// Could not read an input document.
    #[error("Failed to read input file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write an output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config ────────────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Control flow ──────────────────────────────────────────────────────
    /// The user interrupted the run (Ctrl-C). Teardown has already run.
    #[error("Interrupted by user")]
    Interrupted,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MdifyError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            MdifyError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for errors that end the whole run rather than a single file.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            MdifyError::RuntimeNotFound { .. }
                | MdifyError::ImageNotFound { .. }
                | MdifyError::ImagePullFailed { .. }
                | MdifyError::LaunchFailed { .. }
                | MdifyError::HealthTimeout { .. }
                | MdifyError::Interrupted
        )
    }
}
