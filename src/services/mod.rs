pub mod deploy;
pub mod hosting;
pub mod monitor;
pub mod runner;
pub mod workspace;

pub use deploy::DeployService;
pub use hosting::{HostingClient, HostingError};
pub use monitor::{ChangeDetector, MonitorError, MonitorService, ScanReport, SeenKey, TickReport};
pub use runner::{CommandOutcome, CommandRunner, RunnerError, COMMAND_TIMEOUT};
pub use workspace::{WorkspaceError, WorkspaceManager};
