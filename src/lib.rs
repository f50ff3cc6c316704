//! Sentry watches git hosting repositories for new commits and runs
//! deployment recipes from a QA repository when changes land.
//!
//! The library is split into a change-detection side (hosting client,
//! change detector, poller) and a deployment side (workspace manager,
//! command runner, repository deployer, group executor). The two are
//! coupled only by the per-tick trigger plan.

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::{Config, ConfigError};
pub use error::SentryError;
pub use models::{
    CommitInfo, DeployResult, GroupDeployResult, GroupTrigger, RepoChangeEvent, TriggerPlan,
};
pub use services::{
    ChangeDetector, CommandRunner, DeployService, HostingClient, MonitorService, TickReport,
    WorkspaceManager,
};
