use thiserror::Error;

use crate::config::ConfigError;
use crate::services::hosting::HostingError;
use crate::services::monitor::MonitorError;

/// Top-level error type for the sentry binary.
///
/// Service-level errors (hosting probes, workspace I/O, command execution)
/// stay inside the services that produce them; only failures that should
/// terminate an action surface here.
#[derive(Debug, Error)]
pub enum SentryError {
    /// Configuration load or validation error, fatal at startup
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Hosting client could not be constructed
    #[error("hosting client error: {0}")]
    Hosting(#[from] HostingError),

    /// Monitoring subsystem failure (connectivity validation)
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    /// One or more deployments failed during a manual trigger
    #[error("deployment failed: {0}")]
    Deploy(String),
}
