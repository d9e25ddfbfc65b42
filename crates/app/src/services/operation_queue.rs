use repofleet_core::domain::{OperationKind, OperationProgress, RepoPath};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{error, info, info_span, warn, Instrument, Span};

pub const DEFAULT_MAX_CONCURRENT: usize = 5;

pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Sink for progress notifications; called from the queue's worker tasks.
pub type ProgressFn = Arc<dyn Fn(OperationProgress) + Send + Sync>;

/// One unit of work for one repository.
///
/// The queue only knows which repository and operation the task belongs to;
/// what it actually runs is decided by whoever builds it.
pub struct QueuedTask {
    pub repo: RepoPath,
    pub operation: OperationKind,
    run: Box<dyn FnOnce() -> TaskFuture + Send>,
}

impl QueuedTask {
    pub fn new<F, Fut>(repo: RepoPath, operation: OperationKind, run: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            repo,
            operation,
            run: Box::new(move || Box::pin(run())),
        }
    }
}

impl std::fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedTask")
            .field("repo", &self.repo)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedTask>,
    running: usize,
}

struct QueueInner {
    state: Mutex<QueueState>,
    /// Signalled whenever a task finishes or pending work is dropped
    changed: Notify,
    on_progress: ProgressFn,
    max_concurrent: usize,
}

/// Bounded-concurrency queue of per-repository tasks.
///
/// Tasks start in submission order, at most `max_concurrent` at a time, and
/// finish in whatever order they complete. A failing or panicking task only
/// affects its own progress events.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<QueueInner>,
    span: Span,
}

impl OperationQueue {
    pub fn new(on_progress: ProgressFn, max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                changed: Notify::new(),
                on_progress,
                max_concurrent: max_concurrent.max(1),
            }),
            span: info_span!("operation_queue"),
        }
    }

    /// Log under the given span instead of the default one
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Queue `tasks` and wait until every queued task, including those of
    /// earlier calls, has finished.
    pub async fn enqueue(&self, tasks: Vec<QueuedTask>) {
        self.submit(tasks).await
    }

    /// Queue `tasks` right away and return the future that drives the queue
    /// until it is empty.
    ///
    /// Pending events are emitted before this returns, so `is_running`
    /// reports the new work immediately.
    pub fn submit(&self, tasks: Vec<QueuedTask>) -> impl Future<Output = ()> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        {
            let _span = self.span.enter();
            info!("Queueing {} tasks", tasks.len());
        }

        for task in &tasks {
            (inner.on_progress)(OperationProgress::pending(task.repo.clone(), task.operation));
        }
        inner.lock().pending.extend(tasks);

        let span = self.span.clone();
        async move { inner.process(span).await }.instrument(self.span.clone())
    }

    /// Whether any task is waiting or running
    pub fn is_running(&self) -> bool {
        let state = self.inner.lock();
        !state.pending.is_empty() || state.running > 0
    }

    /// Drop tasks that have not started. Running tasks still finish and
    /// report.
    pub fn clear(&self) {
        let dropped = {
            let mut state = self.inner.lock();
            let dropped = state.pending.len();
            state.pending.clear();
            dropped
        };
        if dropped > 0 {
            let _span = self.span.enter();
            info!("Dropped {} queued tasks", dropped);
        }
        self.inner.changed.notify_waiters();
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission loop: start tasks up to the cap, then sleep until a task
    /// finishes.
    async fn process(self: Arc<Self>, span: Span) {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            // Register before inspecting state so no completion is missed
            changed.as_mut().enable();

            let (ready, idle) = {
                let mut state = self.lock();
                let mut ready = Vec::new();
                while state.running < self.max_concurrent {
                    match state.pending.pop_front() {
                        Some(task) => {
                            state.running += 1;
                            ready.push(task);
                        }
                        None => break,
                    }
                }
                (ready, state.pending.is_empty() && state.running == 0)
            };

            for task in ready {
                Arc::clone(&self).start(task, span.clone());
            }

            if idle {
                break;
            }
            changed.await;
        }
    }

    fn start(self: Arc<Self>, task: QueuedTask, span: Span) {
        let QueuedTask {
            repo,
            operation,
            run,
        } = task;
        (self.on_progress)(OperationProgress::running(repo.clone(), operation));

        tokio::spawn(
            async move {
                // Run in its own task so a panic is contained and reported
                let progress = match tokio::spawn(run()).await {
                    Ok(Ok(())) => OperationProgress::success(repo, operation),
                    Ok(Err(e)) => {
                        warn!("Error in {} for {}: {}", operation, repo, e);
                        OperationProgress::error(repo, operation, e.to_string())
                    }
                    Err(e) => {
                        error!("Task {} for {} panicked: {}", operation, repo, e);
                        OperationProgress::error(repo, operation, format!("Task failed: {e}"))
                    }
                };
                (self.on_progress)(progress);

                self.lock().running -= 1;
                self.changed.notify_waiters();
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repofleet_core::domain::ProgressStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn recorder() -> (ProgressFn, Arc<Mutex<Vec<OperationProgress>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let on_progress: ProgressFn =
            Arc::new(move |p: OperationProgress| sink.lock().unwrap().push(p));
        (on_progress, events)
    }

    fn repo(i: usize) -> RepoPath {
        RepoPath::new(format!("/fleet/repo-{i}"))
    }

    fn with_status(events: &[OperationProgress], status: ProgressStatus) -> Vec<RepoPath> {
        events
            .iter()
            .filter(|p| p.status == status)
            .map(|p| p.repo.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_never_exceeds_cap() {
        let (on_progress, _) = recorder();
        let queue = OperationQueue::new(on_progress, 3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..12)
            .map(|i| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                QueuedTask::new(repo(i), OperationKind::Fetch, move || async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(15)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        queue.enqueue(tasks).await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn test_runs_everything_at_once_below_cap() {
        let (on_progress, _) = recorder();
        let queue = OperationQueue::new(on_progress, DEFAULT_MAX_CONCURRENT);
        // Every task waits for all the others; only passes if all run together
        let barrier = Arc::new(tokio::sync::Barrier::new(DEFAULT_MAX_CONCURRENT));

        let tasks = (0..DEFAULT_MAX_CONCURRENT)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                QueuedTask::new(repo(i), OperationKind::Fetch, move || async move {
                    barrier.wait().await;
                    Ok(())
                })
            })
            .collect();

        tokio::time::timeout(Duration::from_secs(5), queue.enqueue(tasks))
            .await
            .expect("all tasks should run concurrently");
    }

    #[tokio::test]
    async fn test_starts_in_submission_order() {
        let (on_progress, events) = recorder();
        let queue = OperationQueue::new(on_progress, 1);
        let started = Arc::new(Mutex::new(Vec::new()));

        let tasks = (0..6)
            .map(|i| {
                let started = Arc::clone(&started);
                QueuedTask::new(repo(i), OperationKind::Push, move || async move {
                    started.lock().unwrap().push(i);
                    Ok(())
                })
            })
            .collect();

        queue.enqueue(tasks).await;

        assert_eq!(*started.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
        let events = events.lock().unwrap();
        let expected: Vec<_> = (0..6).map(repo).collect();
        assert_eq!(with_status(&events, ProgressStatus::Running), expected);
    }

    #[tokio::test]
    async fn test_each_task_reports_pending_running_terminal() {
        let (on_progress, events) = recorder();
        let queue = OperationQueue::new(on_progress, 2);

        let tasks = (0..4)
            .map(|i| {
                QueuedTask::new(repo(i), OperationKind::Reset, move || async move {
                    if i == 2 {
                        anyhow::bail!("fatal: ambiguous argument 'HEAD~1'");
                    }
                    Ok(())
                })
            })
            .collect();

        queue.enqueue(tasks).await;

        let events = events.lock().unwrap();
        for i in 0..4 {
            let statuses: Vec<_> = events
                .iter()
                .filter(|p| p.repo == repo(i))
                .map(|p| p.status)
                .collect();
            let terminal = if i == 2 {
                ProgressStatus::Error
            } else {
                ProgressStatus::Success
            };
            assert_eq!(
                statuses,
                vec![ProgressStatus::Pending, ProgressStatus::Running, terminal]
            );
        }

        let failed = events
            .iter()
            .find(|p| p.status == ProgressStatus::Error)
            .unwrap();
        assert_eq!(failed.error.as_deref(), Some("fatal: ambiguous argument 'HEAD~1'"));
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_siblings() {
        let (on_progress, events) = recorder();
        let queue = OperationQueue::new(on_progress, DEFAULT_MAX_CONCURRENT);

        let tasks = (0..10)
            .map(|i| {
                QueuedTask::new(repo(i), OperationKind::Fetch, move || async move {
                    tokio::time::sleep(Duration::from_millis(5 * (10 - i as u64))).await;
                    if i == 4 {
                        anyhow::bail!("could not read from remote repository");
                    }
                    Ok(())
                })
            })
            .collect();

        queue.enqueue(tasks).await;

        let events = events.lock().unwrap();
        assert_eq!(with_status(&events, ProgressStatus::Success).len(), 9);
        assert_eq!(with_status(&events, ProgressStatus::Error), vec![repo(4)]);
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported_as_error() {
        let (on_progress, events) = recorder();
        let queue = OperationQueue::new(on_progress, 2);

        let tasks = vec![
            QueuedTask::new(repo(0), OperationKind::Checkout, || async {
                let explode = true;
                if explode {
                    panic!("task blew up");
                }
                Ok(())
            }),
            QueuedTask::new(repo(1), OperationKind::Checkout, || async { Ok(()) }),
        ];

        queue.enqueue(tasks).await;

        let events = events.lock().unwrap();
        assert_eq!(with_status(&events, ProgressStatus::Error), vec![repo(0)]);
        assert_eq!(with_status(&events, ProgressStatus::Success), vec![repo(1)]);
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn test_clear_drops_only_unstarted_tasks() {
        let (on_progress, events) = recorder();
        let queue = OperationQueue::new(on_progress, 1);
        let release = Arc::new(Notify::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..4 {
            let release = Arc::clone(&release);
            let ran = Arc::clone(&ran);
            tasks.push(QueuedTask::new(repo(i), OperationKind::Fetch, move || async move {
                ran.fetch_add(1, Ordering::SeqCst);
                if i == 0 {
                    release.notified().await;
                }
                Ok(())
            }));
        }

        let drive = tokio::spawn(queue.submit(tasks));
        assert!(queue.is_running());

        // Wait for the first task to be running
        while ran.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        queue.clear();
        assert!(queue.is_running(), "the running task still counts");
        release.notify_one();

        drive.await.unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!queue.is_running());
        let events = events.lock().unwrap();
        assert_eq!(with_status(&events, ProgressStatus::Pending).len(), 4);
        assert_eq!(with_status(&events, ProgressStatus::Success), vec![repo(0)]);
    }

    #[tokio::test]
    async fn test_concurrent_enqueues_share_the_cap() {
        let (on_progress, events) = recorder();
        let queue = OperationQueue::new(on_progress, 2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let batch = |offset: usize| -> Vec<QueuedTask> {
            (offset..offset + 4)
                .map(|i| {
                    let active = Arc::clone(&active);
                    let peak = Arc::clone(&peak);
                    QueuedTask::new(repo(i), OperationKind::Fetch, move || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                })
                .collect()
        };

        tokio::join!(queue.enqueue(batch(0)), queue.enqueue(batch(4)));

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(
            with_status(&events.lock().unwrap(), ProgressStatus::Success).len(),
            8
        );
    }

    #[tokio::test]
    async fn test_empty_batch_completes_immediately() {
        let (on_progress, events) = recorder();
        let queue = OperationQueue::new(on_progress, 3);
        queue.enqueue(Vec::new()).await;
        assert!(events.lock().unwrap().is_empty());
        assert!(!queue.is_running());
    }
}
