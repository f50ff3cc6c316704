use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentry::config::Config;
use sentry::error::SentryError;
use sentry::services::{DeployService, HostingClient, MonitorService};

#[derive(Debug, Parser)]
#[command(
    name = "sentry",
    version,
    about = "Watches git repositories for new commits and deploys QA recipes on change",
    after_help = help_epilogue()
)]
struct Cli {
    /// Action to perform
    #[arg(short, long, value_enum)]
    action: Action,

    /// Path to the configuration file
    #[arg(short, long, default_value = "sentry.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    /// Poll repositories continuously and deploy on change
    Watch,
    /// Deploy every configured repository once and exit
    Trigger,
    /// Check connectivity to every configured repository and exit
    Validate,
}

fn help_epilogue() -> String {
    format!("Example configuration:\n\n{}", Config::example())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("sentry: failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&cli, &config);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        action = ?cli.action,
        config = %cli.config.display(),
        "starting sentry"
    );

    match run(cli.action, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "action failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli, config: &Config) {
    let default_filter = if cli.verbose {
        "sentry=debug".to_string()
    } else {
        format!(
            "sentry={}",
            config.global.log_level.as_deref().unwrap_or("info")
        )
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(action: Action, config: Arc<Config>) -> Result<(), SentryError> {
    let hosting = HostingClient::new(config.http_timeout())?;
    let deploy = DeployService::new(Arc::clone(&config));
    let monitor = MonitorService::new(Arc::clone(&config), hosting, deploy);

    match action {
        Action::Validate => {
            monitor.validate_connectivity().await?;
            info!("all connectivity probes passed");
            Ok(())
        }
        Action::Trigger => {
            let report = monitor.trigger_all().await;
            if report.success() {
                info!("manual deployment trigger completed");
                Ok(())
            } else {
                Err(SentryError::Deploy(report.failure_summary()))
            }
        }
        Action::Watch => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                info!("shutdown signal received, finishing current dispatch");
                let _ = shutdown_tx.send(true);
            });
            monitor.run(shutdown_rx).await;
            Ok(())
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
