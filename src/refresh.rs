use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::ContextHolder;
use crate::fetcher::{DefinitionFetcher, FetchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Timer,
    Webhook,
    Manual,
}

impl fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefreshTrigger::Timer => "timer",
            RefreshTrigger::Webhook => "webhook",
            RefreshTrigger::Manual => "manual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RefreshOutcome {
    Committed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRefresh {
    pub outcome: RefreshOutcome,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pub attempts: u64,
    pub committed: u64,
    pub failed: u64,
    pub last: Option<LastRefresh>,
}

#[derive(Default)]
struct RefreshStats {
    attempts: AtomicU64,
    committed: AtomicU64,
    failed: AtomicU64,
    last: ArcSwapOption<LastRefresh>,
}

impl RefreshStats {
    fn record(&self, outcome: RefreshOutcome) {
        let counter = match outcome {
            RefreshOutcome::Committed => &self.committed,
            RefreshOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.last.store(Some(Arc::new(LastRefresh {
            outcome,
            at: Utc::now(),
        })));
    }
}

/// Re-fetches the definitions and commits them into the shared context.
/// Timer and webhook refreshes may overlap; each commit is a single pointer
/// swap so the last one to finish wins.
#[derive(Clone)]
pub struct Refresher {
    fetcher: Arc<DefinitionFetcher>,
    holder: Arc<ContextHolder>,
    stats: Arc<RefreshStats>,
}

impl Refresher {
    pub fn new(fetcher: Arc<DefinitionFetcher>, holder: Arc<ContextHolder>) -> Self {
        Self {
            fetcher,
            holder,
            stats: Arc::new(RefreshStats::default()),
        }
    }

    /// On failure the previous definitions stay in place. The error is
    /// returned for callers that report it (webhook, manual refresh); the
    /// timer ignores it.
    pub async fn refresh(&self, trigger: RefreshTrigger) -> Result<(), FetchError> {
        self.stats.attempts.fetch_add(1, Ordering::Relaxed);
        debug!(%trigger, endpoint = self.fetcher.endpoint(), "refreshing feature definitions");

        match self.fetcher.fetch().await {
            Ok(definitions) => {
                let count = definitions.len();
                self.holder.replace(definitions);
                self.stats.record(RefreshOutcome::Committed);
                info!(%trigger, count, "refreshed feature definitions");
                Ok(())
            }
            Err(e) => {
                self.stats.record(RefreshOutcome::Failed);
                warn!(%trigger, error = %e, "failed to refresh feature definitions");
                Err(e)
            }
        }
    }

    pub fn status(&self) -> RefreshStatus {
        RefreshStatus {
            attempts: self.stats.attempts.load(Ordering::Relaxed),
            committed: self.stats.committed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            last: self.stats.last.load_full().map(|last| (*last).clone()),
        }
    }

    /// Refreshes every `period`, measured from the end of the previous
    /// attempt, until `shutdown` is cancelled.
    pub fn spawn_scheduler(&self, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let refresher = self.clone();
        tokio::spawn(async move { refresher.run_scheduler(period, shutdown).await })
    }

    async fn run_scheduler(&self, period: Duration, shutdown: CancellationToken) {
        info!(ttl_seconds = period.as_secs(), "starting feature refresh scheduler");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("feature refresh scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(period) => {}
            }

            // Already logged; a failed attempt must not end the loop
            let _ = self.refresh(RefreshTrigger::Timer).await;
        }
    }
}

/// Waits for a scheduler spawned by [`Refresher::spawn_scheduler`] to exit.
/// Returns false if the task panicked or was aborted.
pub async fn join_scheduler(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "feature refresh scheduler did not shut down cleanly");
            false
        }
    }
}
