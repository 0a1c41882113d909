//! Service lifecycle: sweep stale instances, launch, wait for health,
//! guarantee teardown.
//!
//! ## States
//!
//! ```text
//! Uninitialized ──start()──▶ Starting ──/health 200──▶ Healthy ──stop()──▶ Stopped
//!                               │
//!                               └── launch failure / health timeout ──▶ Error
//! ```
//!
//! `Error` still owns whatever the engine may have started, so `stop()` is
//! valid (and required) from there too. `stop()` issues at most one engine
//! stop per launched instance and never fails.
//!
//! ## Scoped use
//!
//! [`ServiceManager::run_scoped`] wraps start → work → stop so the stop runs
//! on every exit path: success, error, panic inside the work future, and
//! cancellation (Ctrl-C) racing either startup or the work itself.

use crate::client::ConversionClient;
use crate::config::{PullPolicy, ServiceConfig, CONTAINER_PORT, MAX_SYNC_WAIT_ENV};
use crate::error::MdifyError;
use crate::progress::ProgressCallback;
use crate::service::engine::{ContainerEngine, RunSpec};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where a [`ServiceManager`] is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Starting,
    Healthy,
    Stopped,
    Error,
}

/// Identity of one service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    /// Engine binary (`docker`, `podman`, or a path).
    pub runtime: String,
    pub image: String,
    pub port: u16,
    /// `<prefix><8 hex>`, unique per manager.
    pub name: String,
    /// Engine-assigned id, known once `run` succeeds.
    pub instance_id: Option<String>,
}

/// Owns one service instance from launch to teardown.
pub struct ServiceManager {
    engine: Arc<dyn ContainerEngine>,
    client: ConversionClient,
    config: ServiceConfig,
    handle: ServiceHandle,
    state: ServiceState,
    /// Set as soon as `run` is attempted; cleared by the one real stop.
    needs_stop: bool,
    progress: Option<ProgressCallback>,
}

impl ServiceManager {
    /// A manager for one instance of `config.image` on `config.port`.
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        config: ServiceConfig,
    ) -> Result<Self, MdifyError> {
        let probe_timeout = config.health_poll_interval().max(Duration::from_millis(100));
        let client = ConversionClient::new()?.health_timeout(probe_timeout);
        let handle = ServiceHandle {
            runtime: engine.name().to_string(),
            image: config.image.clone(),
            port: config.port,
            name: instance_name(&config.name_prefix),
            instance_id: None,
        };
        Ok(Self {
            engine,
            client,
            config,
            handle,
            state: ServiceState::Uninitialized,
            needs_stop: false,
            progress: None,
        })
    }

    /// Report `on_service_starting` / `on_service_ready` to `cb`.
    pub fn with_progress(mut self, cb: Option<ProgressCallback>) -> Self {
        self.progress = cb;
        self
    }

    pub fn handle(&self) -> &ServiceHandle {
        &self.handle
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// `http://<host>:<port>` of this instance.
    pub fn base_url(&self) -> String {
        self.config.base_url()
    }

    /// Bring the instance up and block until `/health` answers 200.
    ///
    /// Uses [`ServiceConfig::readiness_timeout`] as the bound; see
    /// [`start_with_timeout`](Self::start_with_timeout).
    pub async fn start(&mut self) -> Result<(), MdifyError> {
        let timeout = self.config.readiness_timeout();
        self.start_with_timeout(timeout).await
    }

    /// Sweep stale instances, ensure the image, launch, poll `/health`.
    ///
    /// # Errors
    /// - [`MdifyError::ImageNotFound`] / [`MdifyError::ImagePullFailed`]
    /// - [`MdifyError::LaunchFailed`]: not retried
    /// - [`MdifyError::HealthTimeout`]: `readiness_timeout` elapsed
    ///
    /// On error the state is [`ServiceState::Error`]; call
    /// [`stop`](Self::stop) to release anything the engine started.
    pub async fn start_with_timeout(&mut self, readiness_timeout: Duration) -> Result<(), MdifyError> {
        let never = std::future::pending::<()>();
        tokio::pin!(never);
        self.start_until(readiness_timeout, never).await
    }

    /// [`start_with_timeout`](Self::start_with_timeout) that gives up with
    /// [`MdifyError::Interrupted`] once `cancel` resolves.
    ///
    /// An engine `run` already in flight is always awaited, so the instance
    /// it creates is known to [`stop`](Self::stop).
    async fn start_until<C: Future>(
        &mut self,
        readiness_timeout: Duration,
        cancel: Pin<&mut C>,
    ) -> Result<(), MdifyError> {
        if self.state != ServiceState::Uninitialized {
            return Err(MdifyError::Internal(format!(
                "start() called on a manager in state {:?}",
                self.state
            )));
        }
        self.state = ServiceState::Starting;
        if let Some(ref cb) = self.progress {
            cb.on_service_starting(&self.handle.image);
        }

        match self.launch_and_wait(readiness_timeout, cancel).await {
            Ok(elapsed) => {
                self.state = ServiceState::Healthy;
                info!("{} healthy after {:.1}s", self.handle.name, elapsed.as_secs_f64());
                if let Some(ref cb) = self.progress {
                    cb.on_service_ready(elapsed);
                }
                Ok(())
            }
            Err(e) => {
                self.state = ServiceState::Error;
                Err(e)
            }
        }
    }

    async fn launch_and_wait<C: Future>(
        &mut self,
        readiness_timeout: Duration,
        mut cancel: Pin<&mut C>,
    ) -> Result<Duration, MdifyError> {
        tokio::select! {
            prepared = self.prepare() => prepared?,
            _ = cancel.as_mut() => return Err(MdifyError::Interrupted),
        }

        let spec = RunSpec {
            name: self.handle.name.clone(),
            image: self.handle.image.clone(),
            host_port: self.handle.port,
            container_port: CONTAINER_PORT,
            env: vec![(
                MAX_SYNC_WAIT_ENV.to_string(),
                self.config.conversion_timeout_secs.to_string(),
            )],
        };
        info!(
            "Starting {} ({}) on port {}",
            spec.name, spec.image, spec.host_port
        );
        self.needs_stop = true;
        let id = self.engine.run_detached(&spec).await?;
        self.handle.instance_id = Some(id);

        tokio::select! {
            healthy = self.wait_for_health(readiness_timeout) => healthy,
            _ = cancel => Err(MdifyError::Interrupted),
        }
    }

    /// Everything before `run`: nothing here creates an instance.
    async fn prepare(&self) -> Result<(), MdifyError> {
        self.sweep_stale().await;
        self.ensure_image().await
    }

    /// Stop every running instance carrying this tool's name prefix.
    /// Best-effort: failures are logged and ignored.
    async fn sweep_stale(&self) {
        let stale = match self.engine.list_by_prefix(&self.config.name_prefix).await {
            Ok(names) => names,
            Err(e) => {
                debug!("Stale-instance listing failed: {}", e);
                return;
            }
        };
        for name in stale {
            info!("Stopping stale instance {}", name);
            if let Err(e) = self.engine.stop(&name).await {
                warn!("Could not stop stale instance {}: {}", name, e);
            }
        }
    }

    /// Apply the pull policy.
    async fn ensure_image(&self) -> Result<(), MdifyError> {
        let image = &self.handle.image;
        match self.config.pull_policy {
            PullPolicy::Always => self.engine.pull(image).await,
            PullPolicy::Missing => {
                if self.engine.image_exists(image).await {
                    Ok(())
                } else {
                    self.engine.pull(image).await
                }
            }
            PullPolicy::Never => {
                if self.engine.image_exists(image).await {
                    Ok(())
                } else {
                    Err(MdifyError::ImageNotFound {
                        runtime: self.handle.runtime.clone(),
                        image: image.clone(),
                    })
                }
            }
        }
    }

    /// Probe `/health` every poll interval until 200 or `timeout`.
    ///
    /// The last sleep is cut short at the deadline, so a never-healthy
    /// service fails at `timeout` plus at most one probe.
    async fn wait_for_health(&self, timeout: Duration) -> Result<Duration, MdifyError> {
        let base_url = self.base_url();
        let interval = self.config.health_poll_interval();
        let started = Instant::now();

        loop {
            if self.client.check_health(&base_url).await {
                return Ok(started.elapsed());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(MdifyError::HealthTimeout {
                    runtime: self.handle.runtime.clone(),
                    name: self.handle.name.clone(),
                    secs: timeout.as_secs(),
                });
            }
            debug!("{} not ready after {:?}", self.handle.name, elapsed);
            tokio::time::sleep(interval.min(timeout - elapsed)).await;
        }
    }

    /// One health probe. Never fails.
    pub async fn is_ready(&self) -> bool {
        self.client.check_health(&self.base_url()).await
    }

    /// Stop the instance. Idempotent and infallible.
    ///
    /// The engine is only asked once per launched instance; later calls,
    /// and calls on a manager that never launched, only settle the state.
    pub async fn stop(&mut self) {
        if self.needs_stop {
            self.needs_stop = false;
            info!("Stopping {}", self.handle.name);
            if let Err(e) = self.engine.stop(&self.handle.name).await {
                warn!("Stopping {} failed: {}", self.handle.name, e);
            }
        }
        if self.state != ServiceState::Uninitialized {
            self.state = ServiceState::Stopped;
        }
    }

    /// Start, run `work` against the base URL, stop.
    ///
    /// `cancel` resolving (e.g. `tokio::signal::ctrl_c()`) aborts startup or
    /// `work` and returns [`MdifyError::Interrupted`]; the stop has run by
    /// then. A cancel that lands while the engine is launching takes effect
    /// once the launch returns. A panic in `work` is resumed after the stop.
    pub async fn run_scoped<C, F, Fut, T>(&mut self, cancel: C, work: F) -> Result<T, MdifyError>
    where
        C: Future,
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = T>,
    {
        tokio::pin!(cancel);

        let readiness_timeout = self.config.readiness_timeout();
        let started = self.start_until(readiness_timeout, cancel.as_mut()).await;
        if let Err(e) = started {
            self.stop().await;
            return Err(e);
        }

        let fut = AssertUnwindSafe(work(self.base_url())).catch_unwind();
        let outcome = tokio::select! {
            r = fut => Some(r),
            _ = &mut cancel => None,
        };
        self.stop().await;

        match outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(panic)) => std::panic::resume_unwind(panic),
            None => {
                warn!("Interrupted; {} stopped", self.handle.name);
                Err(MdifyError::Interrupted)
            }
        }
    }
}

impl Drop for ServiceManager {
    fn drop(&mut self) {
        if self.needs_stop {
            warn!("{} dropped while running; stopping in background", self.handle.name);
            self.engine.stop_detached(&self.handle.name);
        }
    }
}

/// `<prefix><first 8 hex of a v4 uuid>`.
fn instance_name(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &hex[..8])
}
