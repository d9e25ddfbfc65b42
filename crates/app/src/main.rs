use anyhow::Result;
use clap::Parser;
use repofleet::adapters::{
    discovery::FsDiscoveryAdapter, git::ProcessGitRunner, log_forward::EventLogLayer,
    persistence::FileConfigStore, watch::PollingRepoWatcher,
};
use repofleet::cli::{run_frontend, CliArgs, CliCommand};
use repofleet::services::app_service::{AppService, Ports};
use repofleet_core::app::Command;
use repofleet_core::domain::{Event, LogLevel};
use repofleet_core::ports::{ConfigStore, FleetConfig, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let (service, mut events, commands) = build_service(&args)?;
    init_tracing(service.event_sender());
    info!(
        "Watching {} roots for repositories",
        service.config().roots.len()
    );

    let mut service = service;
    let service_handle = tokio::spawn(async move { service.run().await });

    let mut stdout = std::io::stdout();
    let outcome = tokio::select! {
        outcome = run_frontend(&args.command, &mut events, &commands, &mut stdout) => outcome,
        _ = tokio::signal::ctrl_c(), if args.command == CliCommand::Watch => Ok(true),
    };

    // Closing the command channel stops the service
    drop(commands);
    if let Err(e) = service_handle.await {
        error!("App service task failed: {:?}", e);
    }

    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Composition root: load configuration and wire the adapters
fn build_service(
    args: &CliArgs,
) -> Result<(
    AppService,
    mpsc::UnboundedReceiver<Event>,
    mpsc::UnboundedSender<Command>,
)> {
    let config_store = match &args.config {
        Some(path) => FileConfigStore::with_path(path),
        None => FileConfigStore::new()?,
    };
    let mut config: FleetConfig = config_store.load()?;
    args.apply_overrides(&mut config);

    let ports = Ports {
        runner: Arc::new(ProcessGitRunner::with_program(config.git_program.clone())),
        discovery: Arc::new(FsDiscoveryAdapter::new()),
        watcher: Arc::new(PollingRepoWatcher::new(Duration::from_millis(
            config.watch_interval_ms,
        ))),
        clock: Arc::new(SystemClock),
    };

    Ok(AppService::new(ports, config))
}

/// Log to stderr, and forward errors to the event stream as well
fn init_tracing(event_tx: mpsc::UnboundedSender<Event>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EventLogLayer::new(event_tx, LogLevel::Error))
        .init();
}
