//! Single-flight batch queue that backfills studio coordinates against the
//! rate-limited provider.
//!
//! Items are drained sequentially by one background task. The pending list and
//! the draining flag live under the same lock, so an `enqueue` either joins the
//! running drain or starts the only one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::QueueSettings;
use crate::errors::{AppError, AppResult};
use crate::writer::StudioGeocoder;

const MAX_RECORDED_FAILURES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Idle,
    Draining,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub studio_id: i64,
    pub error: String,
}

/// Outcome counts for the current (or most recent) drain run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub throttle_retries: usize,
    pub failures: Vec<ItemFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchSummary {
    fn started() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    fn record_failure(&mut self, studio_id: i64, err: &AppError) {
        self.failed += 1;
        if self.failures.len() < MAX_RECORDED_FAILURES {
            self.failures.push(ItemFailure {
                studio_id,
                error: err.to_string(),
            });
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub state: QueueState,
    pub pending_count: usize,
    pub drain_runs: u64,
    pub summary: BatchSummary,
}

#[derive(Debug)]
enum ItemOutcome {
    Succeeded,
    Skipped,
    Failed,
    Fatal(AppError),
}

struct Pending {
    items: VecDeque<i64>,
    draining: bool,
    summary: BatchSummary,
}

struct QueueInner {
    geocoder: Arc<dyn StudioGeocoder>,
    settings: QueueSettings,
    pending: Mutex<Pending>,
    state_tx: watch::Sender<QueueState>,
    drain_runs: AtomicU64,
}

#[derive(Clone)]
pub struct GeocodeQueue {
    inner: Arc<QueueInner>,
}

/// Linear backoff: `base * attempt`, with `attempt` starting at 1.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.max(1))
}

impl GeocodeQueue {
    pub fn new(geocoder: Arc<dyn StudioGeocoder>, settings: QueueSettings) -> Self {
        let (state_tx, _) = watch::channel(QueueState::Idle);
        Self {
            inner: Arc::new(QueueInner {
                geocoder,
                settings,
                pending: Mutex::new(Pending {
                    items: VecDeque::new(),
                    draining: false,
                    summary: BatchSummary::default(),
                }),
                state_tx,
                drain_runs: AtomicU64::new(0),
            }),
        }
    }

    /// Appends a studio id and starts the drain loop if none is running.
    /// Rejected with a configuration error outside a Tokio runtime.
    pub fn enqueue(&self, studio_id: i64) -> AppResult<()> {
        let runtime = Handle::try_current().map_err(|err| {
            AppError::Configuration(format!("geocode queue needs a Tokio runtime: {err}"))
        })?;
        let start_drain = {
            let mut pending = self.inner.pending.lock();
            if pending.items.len() >= self.inner.settings.capacity {
                return Err(AppError::QueueFull(pending.items.len()));
            }
            pending.items.push_back(studio_id);
            self.inner.begin_drain_locked(&mut pending)
        };

        debug!(target: "geocode_queue", studio_id, start_drain, "studio enqueued");
        if start_drain {
            self.spawn_drain(&runtime);
        }
        Ok(())
    }

    /// Enqueues as many ids as capacity allows and returns how many were admitted.
    pub fn enqueue_many<I>(&self, studio_ids: I) -> usize
    where
        I: IntoIterator<Item = i64>,
    {
        let mut admitted = 0;
        for studio_id in studio_ids {
            match self.enqueue(studio_id) {
                Ok(()) => admitted += 1,
                Err(err) => {
                    warn!(target: "geocode_queue", error = %err, "stopping bulk enqueue");
                    break;
                }
            }
        }
        admitted
    }

    /// Drops every item the drain loop has not picked up yet.
    pub fn clear(&self) -> usize {
        let mut pending = self.inner.pending.lock();
        let removed = pending.items.len();
        pending.items.clear();
        info!(target: "geocode_queue", removed, "pending queue cleared");
        removed
    }

    pub fn status(&self) -> QueueStatus {
        let pending = self.inner.pending.lock();
        QueueStatus {
            state: if pending.draining {
                QueueState::Draining
            } else {
                QueueState::Idle
            },
            pending_count: pending.items.len(),
            drain_runs: self.inner.drain_runs.load(Ordering::SeqCst),
            summary: pending.summary.clone(),
        }
    }

    pub fn drain_runs(&self) -> u64 {
        self.inner.drain_runs.load(Ordering::SeqCst)
    }

    pub async fn wait_idle(&self) {
        let mut state_rx = self.inner.state_tx.subscribe();
        let _ = state_rx.wait_for(|state| *state == QueueState::Idle).await;
    }

    fn spawn_drain(&self, runtime: &Handle) {
        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            inner.drain().await;
        });
    }
}

/// Returns the queue to `Idle` if the drain task unwinds or is dropped
/// before finishing on its own.
struct DrainGuard {
    inner: Arc<QueueInner>,
    finished: bool,
}

impl DrainGuard {
    fn finish(&mut self, force: bool) -> bool {
        self.finished = self.inner.try_finish(force);
        self.finished
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(target: "geocode_queue", "drain loop aborted; returning to idle");
            self.inner.try_finish(true);
        }
    }
}

impl QueueInner {
    fn begin_drain_locked(&self, pending: &mut Pending) -> bool {
        if pending.draining {
            return false;
        }
        pending.draining = true;
        pending.summary = BatchSummary::started();
        self.drain_runs.fetch_add(1, Ordering::SeqCst);
        self.state_tx.send_replace(QueueState::Draining);
        true
    }

    fn next_item(&self) -> Option<i64> {
        self.pending.lock().items.pop_front()
    }

    /// Returns to `Idle` when nothing is pending (or `force` is set). The
    /// emptiness check and the state change happen under one lock.
    fn try_finish(&self, force: bool) -> bool {
        let mut pending = self.pending.lock();
        if !force && !pending.items.is_empty() {
            return false;
        }
        pending.draining = false;
        pending.summary.finished_at = Some(Utc::now());
        self.state_tx.send_replace(QueueState::Idle);
        true
    }

    async fn drain(self: Arc<Self>) {
        info!(
            target: "geocode_queue",
            batch_size = self.settings.batch_size,
            "drain loop started"
        );
        let mut guard = DrainGuard {
            inner: Arc::clone(&self),
            finished: false,
        };

        loop {
            let mut taken = 0;
            while taken < self.settings.batch_size {
                let Some(studio_id) = self.next_item() else {
                    break;
                };
                taken += 1;

                if let ItemOutcome::Fatal(err) = self.process(studio_id).await {
                    error!(
                        target: "geocode_queue",
                        studio_id,
                        error = %err,
                        "fatal error; halting drain loop"
                    );
                    guard.finish(true);
                    return;
                }
                sleep(self.settings.inter_request_delay).await;
            }

            if guard.finish(false) {
                break;
            }
            debug!(target: "geocode_queue", taken, "batch complete; pausing before next batch");
            sleep(self.settings.inter_batch_delay).await;
        }

        let summary = self.pending.lock().summary.clone();
        info!(
            target: "geocode_queue",
            processed = summary.processed,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            throttle_retries = summary.throttle_retries,
            "drain loop finished"
        );
    }

    async fn process(&self, studio_id: i64) -> ItemOutcome {
        let mut attempt = 0_u32;
        let outcome = loop {
            match self.geocoder.apply_coordinates(studio_id).await {
                Ok(_) => break ItemOutcome::Succeeded,
                Err(err) if err.is_throttling() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.settings.base_backoff, attempt);
                    warn!(
                        target: "geocode_queue",
                        studio_id,
                        attempt,
                        error = %err,
                        "provider throttled; backing off for {:?}",
                        delay
                    );
                    self.pending.lock().summary.throttle_retries += 1;
                    sleep(delay).await;
                }
                Err(err) if err.is_skip() => {
                    debug!(target: "geocode_queue", studio_id, error = %err, "studio skipped");
                    break ItemOutcome::Skipped;
                }
                Err(err @ AppError::Configuration(_)) => break ItemOutcome::Fatal(err),
                Err(err) => {
                    warn!(target: "geocode_queue", studio_id, error = %err, "studio failed");
                    self.pending.lock().summary.record_failure(studio_id, &err);
                    break ItemOutcome::Failed;
                }
            }
        };

        let mut pending = self.pending.lock();
        pending.summary.processed += 1;
        match &outcome {
            ItemOutcome::Succeeded => pending.summary.succeeded += 1,
            ItemOutcome::Skipped => pending.summary.skipped += 1,
            ItemOutcome::Failed => {}
            ItemOutcome::Fatal(err) => pending.summary.record_failure(studio_id, err),
        }
        drop(pending);
        outcome
    }
}
