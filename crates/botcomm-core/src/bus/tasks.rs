//! Periodic tasks, history persistence, and the start/shutdown lifecycle.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use botcomm_types::config::MAX_INTERVAL_SECS;
use botcomm_types::error::{ProtocolError, RepositoryError};
use botcomm_types::event::BusEvent;
use botcomm_types::message::{BROADCAST_TARGET, EnvelopeInput, MessageType, PROTOCOL_ID, Priority};
use chrono::Utc;
use futures_util::FutureExt;
use serde_json::json;
use tokio::time::{Instant, MissedTickBehavior};

use super::{ProtocolBus, lock, panic_message};
use crate::history::{HISTORY_KEY, parse_snapshot};

impl ProtocolBus {
    /// Spawn the drain, heartbeat/liveness and persistence loops.
    ///
    /// Must be called from within a tokio runtime. A second call while the
    /// loops are running is ignored.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = lock(&self.tasks);
        if !tasks.is_empty() {
            tracing::warn!("protocol bus already started");
            return;
        }

        let bus = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let period = bus.config.drain_interval();
            bus.run_periodic("drain", period, |bus| async move {
                bus.run_tick("drain", || {
                    bus.expire_requests_at(Utc::now());
                    bus.drain();
                });
            })
            .await;
        }));

        let bus = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let period = bus.config.heartbeat_interval();
            bus.run_periodic("heartbeat", period, |bus| async move {
                bus.run_tick("heartbeat", || {
                    if let Err(e) = bus.emit_heartbeat() {
                        tracing::warn!("failed to emit heartbeat: {e}");
                    }
                    bus.check_liveness();
                });
            })
            .await;
        }));

        let bus = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let period = bus.config.persist_interval();
            bus.run_periodic("persist", period, |bus| async move {
                let outcome = AssertUnwindSafe(bus.persist_history()).catch_unwind().await;
                match outcome {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!("history persistence failed: {e}"),
                    Err(payload) => bus.report_task_failure("persist", &panic_message(payload.as_ref())),
                }
            })
            .await;
        }));

        tracing::info!(
            drain_interval = ?self.config.drain_interval(),
            heartbeat_interval = ?self.config.heartbeat_interval(),
            persist_interval = ?self.config.persist_interval(),
            "protocol bus started"
        );
    }

    /// Tick `step` every `period` until the bus is shut down. The first tick
    /// fires one period after the call. Periods are capped at
    /// [`MAX_INTERVAL_SECS`].
    async fn run_periodic<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, step: F)
    where
        F: Fn(Arc<Self>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let period = period.min(Duration::from_secs(MAX_INTERVAL_SECS));
        let now = Instant::now();
        let start = now.checked_add(period).unwrap_or(now);
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(task = name, "periodic task stopped");
                    break;
                }
                _ = interval.tick() => step(Arc::clone(self)).await,
            }
        }
    }

    /// Run one synchronous tick, turning a panic into a `protocol_error`
    /// broadcast instead of killing the loop.
    pub(super) fn run_tick(&self, task: &str, tick: impl FnOnce()) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(tick)) {
            self.report_task_failure(task, &panic_message(payload.as_ref()));
        }
    }

    fn report_task_failure(&self, task: &str, message: &str) {
        let err = ProtocolError::Internal {
            task: task.to_string(),
            message: message.to_string(),
        };
        tracing::error!("{err}");
        let report = EnvelopeInput::new(MessageType::Error, PROTOCOL_ID, BROADCAST_TARGET)
            .with_priority(Priority::High)
            .with_data(json!({
                "error": "protocol_error",
                "task": task,
                "message": message,
            }));
        if let Err(e) = self.send(report) {
            tracing::error!(task, "failed to broadcast task failure: {e}");
        }
    }

    /// Write the trailing history window to the store. Returns the number of
    /// entries written.
    pub async fn persist_history(&self) -> Result<usize, ProtocolError> {
        let (raw, entries) = {
            let history = lock(&self.history);
            let entries = history.len().min(self.config.persisted_history);
            let raw = history
                .snapshot_json(self.config.persisted_history)
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
            (raw, entries)
        };

        self.store.put(HISTORY_KEY, &raw).await?;
        tracing::debug!(entries, "history persisted");
        self.events.publish(BusEvent::HistoryPersisted { entries });
        Ok(entries)
    }

    /// Load the persisted snapshot into memory. Failures are logged and
    /// leave history empty. Returns the number of restored entries.
    pub(super) async fn restore_history(&self) -> usize {
        let raw = match self.store.get(HISTORY_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!("no persisted history, starting empty");
                return 0;
            }
            Err(e) => {
                tracing::warn!("failed to load persisted history: {e}");
                return 0;
            }
        };

        match parse_snapshot(&raw) {
            Ok(entries) => {
                let mut history = lock(&self.history);
                history.restore(entries);
                history.len()
            }
            Err(e) => {
                tracing::warn!("persisted history is malformed, starting empty: {e}");
                0
            }
        }
    }

    /// Stop the periodic tasks, flush history once, and clear all state.
    ///
    /// Queued envelopes are discarded and pending requests are dropped
    /// without invoking their callbacks.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = lock(&self.tasks).drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("periodic task ended abnormally: {e}");
            }
        }

        if let Err(e) = self.persist_history().await {
            tracing::warn!("final history flush failed: {e}");
        }

        let discarded = lock(&self.queue).clear();
        let pending = lock(&self.subscriptions).drain_pending().len();
        lock(&self.subscriptions).clear();
        lock(&self.history).clear();
        self.registry.clear();
        tracing::info!(discarded, pending, "protocol bus shut down");
    }
}
