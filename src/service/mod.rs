//! Lifecycle of the docling-serve container.
//!
//! * [`engine`]: the container engine capability and its docker/podman
//!   implementation
//! * [`manager`]: the start / health-wait / stop state machine built on it

pub mod engine;
pub mod manager;

pub use engine::{CliEngine, ContainerEngine, RunSpec};
pub use manager::{ServiceHandle, ServiceManager, ServiceState};
