//! Container engine capability: the four operations the lifecycle manager
//! needs, behind a trait so tests can substitute a recording double.
//!
//! [`CliEngine`] shells out to `docker` or `podman`. Both accept the same
//! flags for everything used here:
//!
//! ```text
//! ps --filter name=<prefix> --format {{.Names}}
//! stop <name>
//! run -d --rm --name <name> -p <host>:<container> -e K=V <image>
//! image inspect <image>
//! pull <image>
//! ```

use crate::config::ContainerRuntime;
use crate::error::MdifyError;
use async_trait::async_trait;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Everything needed for one detached `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    pub env: Vec<(String, String)>,
}

/// Operations on a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Engine name for logs and error messages (`docker`, `podman`, …).
    fn name(&self) -> &str;

    /// Names of running instances whose name contains `prefix`.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, MdifyError>;

    /// Stop the named instance.
    async fn stop(&self, name: &str) -> Result<(), MdifyError>;

    /// Launch a detached instance; returns the engine's instance id.
    async fn run_detached(&self, spec: &RunSpec) -> Result<String, MdifyError>;

    /// Whether `image` is present locally.
    async fn image_exists(&self, image: &str) -> bool;

    /// Fetch `image` from its registry.
    async fn pull(&self, image: &str) -> Result<(), MdifyError>;

    /// Fire a stop without waiting for it. Used from `Drop`, where nothing
    /// can be awaited. The default does nothing.
    fn stop_detached(&self, name: &str) {
        let _ = name;
    }
}

/// `docker` / `podman` driven through their command-line interface.
#[derive(Debug, Clone)]
pub struct CliEngine {
    binary: String,
}

impl CliEngine {
    /// Use `binary` as-is (a name on `PATH` or an absolute path).
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Find a working engine: `preferred` first, then the other one.
    ///
    /// Falling back is logged as a warning only when the caller asked for
    /// `preferred` explicitly.
    pub async fn detect(preferred: ContainerRuntime, explicit: bool) -> Result<Self, MdifyError> {
        if responds(preferred.binary()).await {
            return Ok(Self::new(preferred.binary()));
        }

        let alternative = preferred.alternative();
        if responds(alternative.binary()).await {
            if explicit {
                warn!("{} not found, using {}", preferred, alternative);
            } else {
                debug!("{} not found, using {}", preferred, alternative);
            }
            return Ok(Self::new(alternative.binary()));
        }

        Err(MdifyError::RuntimeNotFound {
            tried: format!("{preferred}, {alternative}"),
        })
    }

    /// Run one engine command. Dropping the future kills the child.
    async fn exec(&self, args: &[String]) -> std::io::Result<Output> {
        self.exec_with(args, true).await
    }

    async fn exec_with(&self, args: &[String], kill_on_drop: bool) -> std::io::Result<Output> {
        debug!("$ {} {}", self.binary, args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(kill_on_drop)
            .output()
            .await
    }

    fn command_error(&self, command: &str, detail: String) -> MdifyError {
        MdifyError::EngineCommand {
            runtime: self.binary.clone(),
            command: command.to_string(),
            detail,
        }
    }
}

#[async_trait]
impl ContainerEngine for CliEngine {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, MdifyError> {
        let out = self
            .exec(&list_args(prefix))
            .await
            .map_err(|e| self.command_error("ps", e.to_string()))?;
        if !out.status.success() {
            return Err(self.command_error("ps", failure_detail(&out)));
        }
        Ok(parse_names(&String::from_utf8_lossy(&out.stdout), prefix))
    }

    async fn stop(&self, name: &str) -> Result<(), MdifyError> {
        let out = self
            .exec(&["stop".to_string(), name.to_string()])
            .await
            .map_err(|e| self.command_error("stop", e.to_string()))?;
        if !out.status.success() {
            return Err(self.command_error("stop", failure_detail(&out)));
        }
        Ok(())
    }

    async fn run_detached(&self, spec: &RunSpec) -> Result<String, MdifyError> {
        let launch_failed = |detail: String| MdifyError::LaunchFailed {
            runtime: self.binary.clone(),
            name: spec.name.clone(),
            detail,
        };
        // A killed `run` client can still leave the daemon creating the
        // container, so `run` is never killed on drop.
        let out = self
            .exec_with(&run_args(spec), false)
            .await
            .map_err(|e| launch_failed(e.to_string()))?;
        if !out.status.success() {
            return Err(launch_failed(failure_detail(&out)));
        }
        let id = String::from_utf8_lossy(&out.stdout).trim().to_string();
        info!("Started {} ({})", spec.name, short_id(&id));
        Ok(id)
    }

    async fn image_exists(&self, image: &str) -> bool {
        let args = ["image".to_string(), "inspect".to_string(), image.to_string()];
        matches!(self.exec(&args).await, Ok(out) if out.status.success())
    }

    async fn pull(&self, image: &str) -> Result<(), MdifyError> {
        info!("Pulling image: {}", image);
        let out = self
            .exec(&["pull".to_string(), image.to_string()])
            .await
            .map_err(|e| MdifyError::ImagePullFailed {
                image: image.to_string(),
                detail: e.to_string(),
            })?;
        if !out.status.success() {
            return Err(MdifyError::ImagePullFailed {
                image: image.to_string(),
                detail: failure_detail(&out),
            });
        }
        Ok(())
    }

    fn stop_detached(&self, name: &str) {
        let spawned = std::process::Command::new(&self.binary)
            .args(["stop", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = spawned {
            warn!("Could not stop {}: {}", name, e);
        }
    }
}

// ── Argument builders (pure, unit-tested) ────────────────────────────────

fn list_args(prefix: &str) -> Vec<String> {
    vec![
        "ps".to_string(),
        "--filter".to_string(),
        format!("name={prefix}"),
        "--format".to_string(),
        "{{.Names}}".to_string(),
    ]
}

fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "-p".to_string(),
        format!("{}:{}", spec.host_port, spec.container_port),
    ];
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(spec.image.clone());
    args
}

/// One name per line. The engine's `name=` filter is a substring match, so
/// keep only names that actually start with the prefix.
fn parse_names(stdout: &str, prefix: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.starts_with(prefix))
        .map(str::to_string)
        .collect()
}

fn failure_detail(out: &Output) -> String {
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stdout = String::from_utf8_lossy(&out.stdout);
    let detail = if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else if !stdout.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        "Unknown error".to_string()
    };
    match out.status.code() {
        Some(code) => format!("exit {code}: {detail}"),
        None => detail,
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

async fn responds(binary: &str) -> bool {
    matches!(
        Command::new(binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await,
        Ok(status) if status.success()
    )
}
