use anyhow::{Context, Result};
use repofleet_core::domain::{parse_porcelain_status, RepoPath, RepoStatus, STATUS_ARGS};
use repofleet_core::ports::{to_args, Clock, GitRunner};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// Status checks allowed to run at the same time within one cycle
pub const DEFAULT_STATUS_CONCURRENCY: usize = 8;

/// Receives every snapshot produced by continuous polling.
pub type StatusListener = Arc<dyn Fn(Vec<RepoStatus>) + Send + Sync>;

struct PollerInner {
    runner: Arc<dyn GitRunner>,
    clock: Arc<dyn Clock>,
    listener: StatusListener,
    repos: RwLock<Vec<RepoPath>>,
    cache: Mutex<HashMap<RepoPath, RepoStatus>>,
    snapshot: RwLock<Arc<Vec<RepoStatus>>>,
    /// Held for the duration of a cycle so cycles never interleave
    cycle: tokio::sync::Mutex<()>,
    concurrency: usize,
    span: Span,
}

/// Periodically computes the status of every configured repository.
///
/// Cloning yields another handle to the same poller.
#[derive(Clone)]
pub struct StatusPoller {
    inner: Arc<PollerInner>,
    polling: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl StatusPoller {
    pub fn new(runner: Arc<dyn GitRunner>, clock: Arc<dyn Clock>, listener: StatusListener) -> Self {
        Self::with_span(runner, clock, listener, info_span!("status_poller"))
    }

    pub fn with_span(
        runner: Arc<dyn GitRunner>,
        clock: Arc<dyn Clock>,
        listener: StatusListener,
        span: Span,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                runner,
                clock,
                listener,
                repos: RwLock::new(Vec::new()),
                cache: Mutex::new(HashMap::new()),
                snapshot: RwLock::new(Arc::new(Vec::new())),
                cycle: tokio::sync::Mutex::new(()),
                concurrency: DEFAULT_STATUS_CONCURRENCY,
                span,
            }),
            polling: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the polled repositories. Cached statuses of repositories that
    /// are no longer configured are dropped.
    pub fn set_repos(&self, repos: Vec<RepoPath>) {
        let keep: HashSet<&RepoPath> = repos.iter().collect();
        lock(&self.inner.cache).retain(|path, _| keep.contains(path));
        {
            let _span = self.inner.span.enter();
            info!("Tracking {} repositories", repos.len());
        }
        *self
            .inner
            .repos
            .write()
            .unwrap_or_else(PoisonError::into_inner) = repos;
    }

    pub fn repos(&self) -> Vec<RepoPath> {
        self.inner.repos()
    }

    /// Run one status cycle over every configured repository.
    ///
    /// The result keeps the configured order; repositories whose status could
    /// not be obtained are left out.
    pub async fn poll_once(&self) -> Vec<RepoStatus> {
        Arc::clone(&self.inner).poll_once().await
    }

    /// Last known status of one repository
    pub fn cached(&self, path: &RepoPath) -> Option<RepoStatus> {
        lock(&self.inner.cache).get(path).cloned()
    }

    /// Last complete snapshot
    pub fn snapshot(&self) -> Arc<Vec<RepoStatus>> {
        Arc::clone(
            &self
                .inner
                .snapshot
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Poll now and then every `interval`, handing each snapshot to the
    /// listener. A previous polling loop is stopped first.
    pub fn start_polling(&self, interval: Duration) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("Status polling requires a Tokio runtime")?;
        self.stop_polling();

        let interval = interval.max(Duration::from_millis(1));
        let inner = Arc::clone(&self.inner);
        let span = self.inner.span.clone();
        {
            let _span = span.enter();
            info!("Starting polling with {}ms interval", interval.as_millis());
        }

        let handle = runtime.spawn(
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let statuses = Arc::clone(&inner).poll_once().await;
                    (inner.listener)(statuses);
                }
            }
            .instrument(span),
        );

        *lock(&self.polling) = Some(handle);
        Ok(())
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = lock(&self.polling).take() {
            handle.abort();
            let _span = self.inner.span.enter();
            info!("Stopped polling");
        }
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.polling)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl PollerInner {
    fn repos(&self) -> Vec<RepoPath> {
        self.repos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn poll_once(self: Arc<Self>) -> Vec<RepoStatus> {
        let _cycle = self.cycle.lock().await;
        let repos = self.repos();
        debug!("Polling {} repositories", repos.len());

        let limit = Arc::new(Semaphore::new(self.concurrency));
        let mut checks = JoinSet::new();
        for (index, repo) in repos.into_iter().enumerate() {
            let runner = Arc::clone(&self.runner);
            let clock = Arc::clone(&self.clock);
            let limit = Arc::clone(&limit);
            checks.spawn(
                async move {
                    let _permit = limit.acquire_owned().await.ok();
                    (index, check_status(runner.as_ref(), clock.as_ref(), repo).await)
                }
                .instrument(self.span.clone()),
            );
        }

        let mut found = Vec::new();
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok((index, Some(status))) => found.push((index, status)),
                Ok((_, None)) => {}
                Err(e) => warn!("Status check task failed: {}", e),
            }
        }
        found.sort_by_key(|(index, _)| *index);
        let statuses: Vec<RepoStatus> = found.into_iter().map(|(_, status)| status).collect();

        {
            let mut cache = lock(&self.cache);
            for status in &statuses {
                cache.insert(status.path.clone(), status.clone());
            }
        }
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(statuses.clone());

        statuses
    }
}

async fn check_status(runner: &dyn GitRunner, clock: &dyn Clock, repo: RepoPath) -> Option<RepoStatus> {
    match runner.run(&repo, &to_args(STATUS_ARGS), None).await {
        // A non-zero exit still carries whatever git printed
        Ok(result) => Some(parse_porcelain_status(&result.stdout).into_status(repo, clock.now_millis())),
        Err(e) => {
            warn!("Error polling {}: {}", repo, e);
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
