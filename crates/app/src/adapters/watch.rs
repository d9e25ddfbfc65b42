use crate::adapters::discovery::marker_paths;
use anyhow::{Context, Result};
use repofleet_core::ports::{ChangeCallback, DiscoverReq, RepoWatcher, WatchGuard};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument, Span};

/// Watcher that periodically re-walks the roots and signals when a
/// repository marker appeared or disappeared.
///
/// A marker change is reported at most one interval after it happens.
pub struct PollingRepoWatcher {
    interval: Duration,
    span: Span,
}

impl PollingRepoWatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            span: info_span!("repo_watcher"),
        }
    }

    /// Log under the given span instead of the default one
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

impl RepoWatcher for PollingRepoWatcher {
    fn watch(&self, req: DiscoverReq, on_change: ChangeCallback) -> Result<WatchGuard> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("Repository watching requires a Tokio runtime")?;

        let token = CancellationToken::new();
        let stop = token.clone();
        let interval = self.interval;

        runtime.spawn(
            async move {
                let mut previous = snapshot(&req).await;
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    let current = snapshot(&req).await;
                    if current != previous {
                        if current.difference(&previous).next().is_some() {
                            info!("Git directory created, refreshing");
                        } else {
                            info!("Git directory deleted, refreshing");
                        }
                        on_change();
                        previous = current;
                    }
                }
                info!("Stopped watching");
            }
            .instrument(self.span.clone()),
        );

        Ok(WatchGuard::new(move || stop.cancel()))
    }
}

async fn snapshot(req: &DiscoverReq) -> BTreeSet<PathBuf> {
    let req = req.clone();
    tokio::task::spawn_blocking(move || {
        req.roots
            .iter()
            .flat_map(|root| marker_paths(root, req.max_depth))
            .collect()
    })
    .await
    .unwrap_or_default()
}
