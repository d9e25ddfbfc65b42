use crate::services::bulk_operations::BulkOperations;
use crate::services::operation_queue::OperationQueue;
use crate::services::status_poller::StatusPoller;
use anyhow::Result;
use repofleet_core::app::Command;
use repofleet_core::domain::{
    log_args, parse_log, BulkOperationRequest, Event, LogLevel, OperationKind, RepoPath,
    RepoStatus,
};
use repofleet_core::ports::{
    Clock, DiscoverReq, DiscoveryPort, FleetConfig, GitRunner, RepoWatcher, WatchGuard,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Adapters the service is wired with
#[derive(Clone)]
pub struct Ports {
    pub runner: Arc<dyn GitRunner>,
    pub discovery: Arc<dyn DiscoveryPort>,
    pub watcher: Arc<dyn RepoWatcher>,
    pub clock: Arc<dyn Clock>,
}

/// The main application service that coordinates all operations.
///
/// Commands come in on one channel, events go out on another. Discovery,
/// polling and bulk operations all run in the background and report through
/// the event channel.
pub struct AppService {
    ports: Ports,
    config: FleetConfig,

    poller: StatusPoller,
    bulk: BulkOperations,

    // Outbound events
    event_tx: mpsc::UnboundedSender<Event>,

    // Commands from the front end
    command_rx: mpsc::UnboundedReceiver<Command>,

    // Commands raised by the service itself (watcher, completed batches)
    internal_tx: mpsc::UnboundedSender<Command>,
    internal_rx: mpsc::UnboundedReceiver<Command>,

    watch_guard: Option<WatchGuard>,
    // Bumped per scan; only the latest scan may replace the repository set
    discovery_generation: Arc<Mutex<u64>>,
    tasks: JoinSet<Result<()>>,
    span: Span,
}

impl AppService {
    pub fn new(
        ports: Ports,
        config: FleetConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Event>, mpsc::UnboundedSender<Command>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let span = info_span!("app_service");

        let status_tx = event_tx.clone();
        let poller = StatusPoller::with_span(
            Arc::clone(&ports.runner),
            Arc::clone(&ports.clock),
            Arc::new(move |repos: Vec<RepoStatus>| {
                let _ = status_tx.send(Event::RepoStatusUpdate { repos });
            }),
            info_span!(parent: &span, "status_poller"),
        );

        let progress_tx = event_tx.clone();
        let queue = OperationQueue::new(
            Arc::new(move |progress| {
                let _ = progress_tx.send(Event::OperationProgress(progress));
            }),
            config.max_concurrent,
        )
        .with_span(info_span!(parent: &span, "operation_queue"));

        let complete_tx = event_tx.clone();
        let refresh_tx = internal_tx.clone();
        let bulk = BulkOperations::new(
            Arc::clone(&ports.runner),
            queue,
            Arc::new(move || {
                let _ = complete_tx.send(Event::OperationComplete);
                // Statuses are stale after an operation
                let _ = refresh_tx.send(Command::RefreshStatus);
            }),
        )
        .with_span(info_span!(parent: &span, "bulk_operations"));

        let service = Self {
            ports,
            config,
            poller,
            bulk,
            event_tx,
            command_rx,
            internal_tx,
            internal_rx,
            watch_guard: None,
            discovery_generation: Arc::new(Mutex::new(0)),
            tasks: JoinSet::new(),
            span,
        };

        (service, event_rx, command_tx)
    }

    /// Get a clone of the event sender for external use (log forwarding, etc.)
    pub fn event_sender(&self) -> mpsc::UnboundedSender<Event> {
        self.event_tx.clone()
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Run until the command channel closes
    pub async fn run(&mut self) -> Result<()> {
        let span = self.span.clone();
        self.run_event_loop().instrument(span).await
    }

    /// Handle a command (CQRS Command side)
    pub async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::FetchRepos => {
                info!("Rediscovering repositories");
                self.ensure_watching();
                self.start_discovery();
            }
            Command::RefreshStatus => {
                let poller = self.poller.clone();
                let event_tx = self.event_tx.clone();
                self.tasks.spawn(async move {
                    let repos = poller.poll_once().await;
                    let _ = event_tx.send(Event::RepoStatusUpdate { repos });
                    Ok(())
                });
            }
            Command::BulkFetch(request) => self.start_bulk(OperationKind::Fetch, request),
            Command::BulkCheckout(request) => self.start_bulk(OperationKind::Checkout, request),
            Command::BulkPush(request) => self.start_bulk(OperationKind::Push, request),
            Command::BulkReset(request) => self.start_bulk(OperationKind::Reset, request),
            Command::FetchGitTree { repo, count } => {
                self.load_git_tree(repo, Command::tree_count(count));
            }
        }
        Ok(())
    }

    /// Watch the roots for repositories appearing or disappearing
    fn ensure_watching(&mut self) {
        if self.watch_guard.is_some() {
            return;
        }

        let trigger = self.internal_tx.clone();
        let watched = self.ports.watcher.watch(
            self.discover_req(),
            Box::new(move || {
                let _ = trigger.send(Command::FetchRepos);
            }),
        );
        match watched {
            Ok(guard) => self.watch_guard = Some(guard),
            Err(e) => warn!("Failed to watch repository roots: {:#}", e),
        }
    }

    /// Scan the roots in the background, then restart polling over the result
    fn start_discovery(&mut self) {
        let discovery = Arc::clone(&self.ports.discovery);
        let poller = self.poller.clone();
        let req = self.discover_req();
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let latest = Arc::clone(&self.discovery_generation);
        let generation = {
            let mut current = latest.lock().unwrap_or_else(PoisonError::into_inner);
            *current += 1;
            *current
        };

        self.tasks.spawn(
            async move {
                // Walking directory trees blocks
                let repos = tokio::task::spawn_blocking(move || discovery.scan(&req)).await?;
                apply_discovery(&latest, generation, &poller, repos, interval)
            }
            .instrument(self.span.clone()),
        );
    }

    fn start_bulk(&mut self, operation: OperationKind, mut request: BulkOperationRequest) {
        // The command decides the operation
        request.operation = operation;

        match self.bulk.submit(&request) {
            Ok(batch) => {
                self.tasks.spawn(async move {
                    batch.await;
                    Ok(())
                });
            }
            Err(e) => {
                warn!("Rejected {} request: {}", operation, e);
                let _ = self.event_tx.send(Event::LogMessage {
                    level: LogLevel::Error,
                    message: format!("Cannot start {operation}: {e}"),
                });
            }
        }
    }

    fn load_git_tree(&mut self, repo: RepoPath, count: usize) {
        let runner = Arc::clone(&self.ports.runner);
        let event_tx = self.event_tx.clone();

        let span = self.span.clone();
        self.tasks.spawn(
            async move {
                let outcome = runner.run(&repo, &log_args(count), None).await;
                let message = match outcome {
                    Ok(result) if result.success() => {
                        let commits = parse_log(&result.stdout);
                        info!("Loaded {} commits for {}", commits.len(), repo);
                        let _ = event_tx.send(Event::GitTreeUpdate { repo, commits });
                        return Ok(());
                    }
                    Ok(result) => result
                        .failure_message("Failed to load commit history")
                        .trim()
                        .to_string(),
                    Err(e) => e.to_string(),
                };

                warn!("Failed to load git tree for {}: {}", repo, message);
                let _ = event_tx.send(Event::LogMessage {
                    level: LogLevel::Error,
                    message: format!("Failed to load git tree for {repo}: {message}"),
                });
                Ok(())
            }
            .instrument(span),
        );
    }

    fn discover_req(&self) -> DiscoverReq {
        DiscoverReq {
            roots: self.config.roots.clone(),
            max_depth: self.config.max_depth,
        }
    }

    /// Main command processing loop
    async fn run_event_loop(&mut self) -> Result<()> {
        info!("Starting event loop");

        loop {
            tokio::select! {
                // Commands from the front end
                command = self.command_rx.recv() => {
                    match command {
                        Some(cmd) => {
                            if let Err(e) = self.handle_command(cmd).await {
                                error!("Error handling command: {}", e);
                            }
                        }
                        None => {
                            info!("Command channel closed, stopping event loop");
                            break;
                        }
                    }
                }

                // Commands raised internally
                Some(cmd) = self.internal_rx.recv() => {
                    if let Err(e) = self.handle_command(cmd).await {
                        error!("Error handling command: {}", e);
                    }
                }

                // Completed background tasks
                Some(task_result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    match task_result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!("Background task failed: {:#}", e),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => error!("Background task panicked: {}", e),
                    }
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    fn shutdown(&mut self) {
        info!("Shutting down background tasks");
        self.watch_guard = None;
        self.poller.stop_polling();
        self.tasks.abort_all();
    }
}

/// Hand a finished scan to the poller unless a newer scan has started since
fn apply_discovery(
    latest: &Mutex<u64>,
    generation: u64,
    poller: &StatusPoller,
    repos: Vec<RepoPath>,
    interval: Duration,
) -> Result<()> {
    let current = latest.lock().unwrap_or_else(PoisonError::into_inner);
    if *current != generation {
        debug!(
            "Discarding discovery result {} superseded by {}",
            generation, *current
        );
        return Ok(());
    }

    info!("Discovery found {} repositories", repos.len());
    poller.set_repos(repos);
    poller.start_polling(interval)
}

impl Drop for AppService {
    fn drop(&mut self) {
        self.watch_guard = None;
        self.poller.stop_polling();
        self.tasks.abort_all();
    }
}
