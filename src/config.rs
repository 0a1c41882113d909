//! Configuration types for the service lifecycle and per-file conversion.
//!
//! Two structs split the knobs by who consumes them:
//!
//! * [`ServiceConfig`]: everything the [`crate::service::ServiceManager`]
//!   needs to bring a docling-serve container up and tear it down.
//! * [`ConversionOptions`]: what the batch driver sends with each file.
//!
//! `ServiceConfig` is built through [`ServiceConfigBuilder`] so callers set
//! only what they care about and get validated defaults for the rest.

use crate::error::MdifyError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// CPU image published by the docling project.
pub const DEFAULT_IMAGE: &str = "ghcr.io/docling-project/docling-serve-cpu:main";

/// CUDA 12.6 image, selected by `--gpu`.
pub const GPU_IMAGE: &str = "ghcr.io/docling-project/docling-serve-cu126:main";

/// Host port bound by default.
pub const DEFAULT_PORT: u16 = 5001;

/// Port docling-serve listens on inside the container.
pub const CONTAINER_PORT: u16 = 5001;

/// Every instance this tool launches is named `<prefix><8 hex>`.
pub const DEFAULT_NAME_PREFIX: &str = "mdify-serve-";

/// Environment variable docling-serve reads for its synchronous wait bound.
pub const MAX_SYNC_WAIT_ENV: &str = "DOCLING_SERVE_MAX_SYNC_WAIT";

/// Supported container engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    #[default]
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Executable name looked up on `PATH`.
    pub fn binary(self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }

    /// The other supported engine, tried when this one is missing.
    pub fn alternative(self) -> Self {
        match self {
            ContainerRuntime::Docker => ContainerRuntime::Podman,
            ContainerRuntime::Podman => ContainerRuntime::Docker,
        }
    }
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// When to pull the service image before launching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// Pull on every run.
    Always,
    /// Pull only when the image is not present locally. (default)
    #[default]
    Missing,
    /// Never pull; fail if the image is absent.
    Never,
}

/// Configuration for one service instance.
///
/// # Example
/// ```rust
/// use mdify::{PullPolicy, ServiceConfig};
///
/// let config = ServiceConfig::builder()
///     .port(5002)
///     .readiness_timeout_secs(300)
///     .pull_policy(PullPolicy::Never)
///     .build()
///     .unwrap();
/// assert_eq!(config.base_url(), "http://localhost:5002");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Container image reference. Default: [`DEFAULT_IMAGE`].
    pub image: String,

    /// Host name the client uses to reach the bound port. Default: `localhost`.
    pub host: String,

    /// Host port bound to the container's 5001. Default: 5001.
    pub port: u16,

    /// Per-conversion wait bound in seconds, handed to the service as
    /// `DOCLING_SERVE_MAX_SYNC_WAIT`. Default: 1200.
    pub conversion_timeout_secs: u64,

    /// How long `start()` waits for `/health`. Default: 120.
    pub readiness_timeout_secs: u64,

    /// Gap between health probes in milliseconds. Default: 2000.
    pub health_poll_interval_ms: u64,

    /// Default: [`PullPolicy::Missing`].
    pub pull_policy: PullPolicy,

    /// Instance name prefix; also the filter for the stale-instance sweep.
    pub name_prefix: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            conversion_timeout_secs: 1200,
            readiness_timeout_secs: 120,
            health_poll_interval_ms: 2000,
            pull_policy: PullPolicy::default(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// `http://<host>:<port>`.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.config.image = image.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn readiness_timeout_secs(mut self, secs: u64) -> Self {
        self.config.readiness_timeout_secs = secs;
        self
    }

    /// Probes closer than 10 ms apart only burn CPU.
    pub fn health_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.health_poll_interval_ms = ms.max(10);
        self
    }

    pub fn pull_policy(mut self, policy: PullPolicy) -> Self {
        self.config.pull_policy = policy;
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.name_prefix = prefix.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, MdifyError> {
        let c = &self.config;
        if c.image.trim().is_empty() {
            return Err(MdifyError::InvalidConfig("image must not be empty".into()));
        }
        if c.port == 0 {
            return Err(MdifyError::InvalidConfig("port must be ≥ 1".into()));
        }
        if c.conversion_timeout_secs == 0 {
            return Err(MdifyError::InvalidConfig(
                "conversion timeout must be ≥ 1s".into(),
            ));
        }
        if c.name_prefix.is_empty() {
            return Err(MdifyError::InvalidConfig(
                "instance name prefix must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

/// How each file is submitted to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionMode {
    /// One blocking `POST /v1/convert/file`. (default)
    #[default]
    Sync,
    /// Submit to `/v1/convert/file/async`, poll, then fetch the result.
    AsyncTask,
}

/// Per-file conversion settings used by the batch driver.
#[derive(Clone)]
pub struct ConversionOptions {
    /// Output format requested from the service. Default: `md`.
    pub to_format: String,

    /// Run OCR on scanned content. Default: true.
    pub do_ocr: bool,

    /// Default: [`ConversionMode::Sync`].
    pub mode: ConversionMode,

    /// Gap between task status polls in async-task mode. Default: 1000 ms.
    pub task_poll_interval_ms: u64,

    /// Upper bound on one async task, in seconds. Default: 1200.
    pub task_timeout_secs: u64,

    /// Replace existing output files instead of skipping them. Default: false.
    pub overwrite: bool,

    /// Receives batch events; purely cosmetic.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            to_format: "md".to_string(),
            do_ocr: true,
            mode: ConversionMode::default(),
            task_poll_interval_ms: 1000,
            task_timeout_secs: 1200,
            overwrite: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionOptions")
            .field("to_format", &self.to_format)
            .field("do_ocr", &self.do_ocr)
            .field("mode", &self.mode)
            .field("task_poll_interval_ms", &self.task_poll_interval_ms)
            .field("task_timeout_secs", &self.task_timeout_secs)
            .field("overwrite", &self.overwrite)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_docling_serve() {
        let c = ServiceConfig::default();
        assert_eq!(c.port, 5001);
        assert_eq!(c.conversion_timeout_secs, 1200);
        assert_eq!(c.readiness_timeout_secs, 120);
        assert_eq!(c.health_poll_interval(), Duration::from_secs(2));
        assert_eq!(c.base_url(), "http://localhost:5001");
        assert_eq!(c.pull_policy, PullPolicy::Missing);
    }

    #[test]
    fn builder_rejects_empty_image() {
        let err = ServiceConfig::builder().image("  ").build().unwrap_err();
        assert!(matches!(err, MdifyError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_port_zero() {
        assert!(ServiceConfig::builder().port(0).build().is_err());
    }

    #[test]
    fn builder_clamps_poll_interval() {
        let c = ServiceConfig::builder()
            .health_poll_interval_ms(0)
            .build()
            .unwrap();
        assert_eq!(c.health_poll_interval_ms, 10);
    }

    #[test]
    fn runtime_alternative_round_trips() {
        assert_eq!(ContainerRuntime::Docker.alternative(), ContainerRuntime::Podman);
        assert_eq!(ContainerRuntime::Podman.alternative(), ContainerRuntime::Docker);
        assert_eq!(ContainerRuntime::Podman.to_string(), "podman");
    }
}
