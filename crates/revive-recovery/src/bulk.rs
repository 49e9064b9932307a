//! Bounded worker pool for bulk torrent actions.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use revive_telemetry::Metrics;
use revive_torrent_core::{TorrentId, TorrentSnapshot};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Result of one target in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// The action took effect.
    Applied,
    /// The action was withdrawn, e.g. because a recovery was dismissed.
    Cancelled,
    /// The action failed.
    Failed {
        /// Failure detail, logged but not surfaced individually.
        message: String,
    },
}

impl ItemOutcome {
    /// Metric label for the outcome.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Cancelled => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether the item is a hard failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Per-target entry of a [`BatchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    /// Target torrent.
    pub torrent_id: TorrentId,
    /// What happened to it.
    pub outcome: ItemOutcome,
}

/// Why a batch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailureReason {
    /// At least one item failed.
    ExecutionFailed,
}

/// Aggregate outcome of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// No item failed.
    Success,
    /// Some item failed.
    Failed {
        /// Aggregate reason.
        reason: BatchFailureReason,
    },
}

/// Every item outcome in input order plus the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Action label, e.g. `resume`.
    pub action: String,
    /// Aggregate outcome.
    pub outcome: BatchOutcome,
    /// Per-target outcomes in the order targets were given.
    pub items: Vec<ItemReport>,
}

impl BatchReport {
    /// Number of items that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.outcome.is_failure())
            .count()
    }

    /// Number of items that were applied.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.outcome == ItemOutcome::Applied)
            .count()
    }
}

/// Runs a per-torrent handler over many targets with a concurrency ceiling.
#[derive(Clone)]
pub struct BulkScheduler {
    concurrency: usize,
    metrics: Metrics,
}

impl BulkScheduler {
    /// Scheduler with at most `concurrency` handlers in flight (at least one).
    #[must_use]
    pub fn new(concurrency: usize, metrics: Metrics) -> Self {
        Self {
            concurrency: concurrency.max(1),
            metrics,
        }
    }

    /// Configured ceiling.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `handler` for every target and wait for all of them.
    ///
    /// A handler error or panic is recorded as a failed item; it never
    /// escapes the scheduler and never stops sibling workers.
    pub async fn run<F, Fut>(
        &self,
        action: &str,
        targets: Vec<TorrentSnapshot>,
        handler: F,
    ) -> BatchReport
    where
        F: Fn(TorrentSnapshot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ItemOutcome>> + Send + 'static,
    {
        let started = Instant::now();
        let total = targets.len();
        let ids: Vec<TorrentId> = targets.iter().map(|torrent| torrent.id.clone()).collect();
        let pending: Arc<Mutex<VecDeque<(usize, TorrentSnapshot)>>> =
            Arc::new(Mutex::new(targets.into_iter().enumerate().collect()));
        let handler = Arc::new(handler);

        let mut workers = JoinSet::new();
        for worker in 0..self.concurrency.min(total) {
            let pending = Arc::clone(&pending);
            let handler = Arc::clone(&handler);
            let metrics = self.metrics.clone();
            workers.spawn(async move {
                let mut finished = Vec::new();
                loop {
                    let next = pending
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .pop_front();
                    let Some((index, torrent)) = next else {
                        break;
                    };
                    let torrent_id = torrent.id.clone();
                    let outcome = match tokio::spawn((*handler)(torrent)).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(err)) => ItemOutcome::Failed {
                            message: format!("{err:#}"),
                        },
                        Err(err) => ItemOutcome::Failed {
                            message: err.to_string(),
                        },
                    };
                    if let ItemOutcome::Failed { message } = &outcome {
                        warn!(worker, torrent_id = %torrent_id, error = %message, "bulk item failed");
                    } else {
                        debug!(worker, torrent_id = %torrent_id, status = outcome.status(), "bulk item finished");
                    }
                    metrics.inc_bulk_item(outcome.status());
                    finished.push((index, outcome));
                }
                finished
            });
        }

        let mut slots: Vec<Option<ItemOutcome>> = vec![None; total];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(finished) => {
                    for (index, outcome) in finished {
                        if let Some(slot) = slots.get_mut(index) {
                            *slot = Some(outcome);
                        }
                    }
                }
                Err(err) => warn!(error = %err, "bulk worker aborted"),
            }
        }

        let items: Vec<ItemReport> = ids
            .into_iter()
            .zip(slots)
            .map(|(torrent_id, outcome)| ItemReport {
                torrent_id,
                outcome: outcome.unwrap_or_else(|| ItemOutcome::Failed {
                    message: "worker aborted".to_string(),
                }),
            })
            .collect();
        let outcome = if items.iter().any(|item| item.outcome.is_failure()) {
            BatchOutcome::Failed {
                reason: BatchFailureReason::ExecutionFailed,
            }
        } else {
            BatchOutcome::Success
        };
        let report = BatchReport {
            action: action.to_string(),
            outcome,
            items,
        };

        let elapsed = started.elapsed();
        self.metrics.observe_bulk_duration(elapsed);
        info!(
            action,
            total,
            failed = report.failed(),
            elapsed = ?elapsed,
            "bulk action completed"
        );
        report
    }
}
