use crate::services::operation_queue::{OperationQueue, QueuedTask};
use anyhow::bail;
use repofleet_core::domain::{BulkOperationRequest, GitOperation, RepoPath, PUSH_PRECONDITION_ARGS};
use repofleet_core::error::{CoreError, Result};
use repofleet_core::ports::{to_args, GitRunner};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, info_span, Instrument, Span};

/// Called once a whole batch has finished.
pub type CompleteFn = Arc<dyn Fn() + Send + Sync>;

const DIRTY_WORKING_COPY: &str = "Repository has uncommitted changes";

/// Translates bulk requests into queued per-repository git invocations.
pub struct BulkOperations {
    runner: Arc<dyn GitRunner>,
    queue: OperationQueue,
    on_complete: CompleteFn,
    span: Span,
}

impl BulkOperations {
    pub fn new(runner: Arc<dyn GitRunner>, queue: OperationQueue, on_complete: CompleteFn) -> Self {
        Self {
            runner,
            queue,
            on_complete,
            span: info_span!("bulk_operations"),
        }
    }

    /// Log under the given span instead of the default one
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Validate `request` and queue one task per repository.
    ///
    /// Nothing is queued when validation fails or another batch is still
    /// running. The returned future finishes when the queue drains and then
    /// fires the completion callback.
    pub fn submit(
        &self,
        request: &BulkOperationRequest,
    ) -> Result<impl Future<Output = ()> + Send + 'static> {
        let operation = request.validate()?;
        if self.queue.is_running() {
            return Err(CoreError::Busy);
        }

        {
            let _span = self.span.enter();
            info!(
                "Starting {} on {} repositories",
                operation.kind(),
                request.repos.len()
            );
        }

        let tasks = request
            .repos
            .iter()
            .map(|repo| {
                let runner = Arc::clone(&self.runner);
                let operation = operation.clone();
                let target = repo.clone();
                QueuedTask::new(repo.clone(), operation.kind(), move || async move {
                    run_operation(runner.as_ref(), &target, &operation).await
                })
            })
            .collect();

        let drained = self.queue.submit(tasks);
        let on_complete = Arc::clone(&self.on_complete);
        let kind = operation.kind();
        Ok(async move {
            drained.await;
            info!("Finished {}", kind);
            on_complete();
        }
        .instrument(self.span.clone()))
    }

    /// Submit `request` and wait for the batch to finish
    pub async fn execute(&self, request: &BulkOperationRequest) -> Result<()> {
        self.submit(request)?.await;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.queue.is_running()
    }
}

/// Run one validated operation in one repository.
///
/// Push first requires a clean working copy; a dirty one fails the task
/// without pushing.
pub async fn run_operation(
    runner: &dyn GitRunner,
    repo: &RepoPath,
    operation: &GitOperation,
) -> anyhow::Result<()> {
    if let GitOperation::Push = operation {
        let check = runner
            .run(repo, &to_args(PUSH_PRECONDITION_ARGS), None)
            .await?;
        if !check.success() {
            bail!(failure_text(&check.failure_message("Status check failed")));
        }
        if !check.stdout.trim().is_empty() {
            bail!(DIRTY_WORKING_COPY);
        }
    }

    let result = runner.run(repo, &operation.args(), None).await?;
    if !result.success() {
        bail!(failure_text(&result.failure_message(operation.failure_fallback())));
    }
    Ok(())
}

fn failure_text(message: &str) -> String {
    message.trim().to_string()
}
