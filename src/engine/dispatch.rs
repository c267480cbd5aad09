//! Dispatch loop: receive a batch, dedup, run handlers, acknowledge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, warn};

use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::jobs::{JobState, JobTracker};
use crate::queue::{MessageQueue, QueueMessage};
use crate::telemetry::message::{record_decision, record_outcome, start_message_span};
use crate::telemetry::metrics;

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Queue to consume.
    pub queue_name: String,
    /// Ids remembered for dedup. Zero or less disables dedup.
    pub tracker_capacity: i64,
    /// Messages requested per receive.
    pub batch_size: i32,
    /// Seconds a received message stays hidden before redelivery.
    pub visibility_timeout: i32,
    /// Long-poll wait per receive, in seconds.
    pub wait_seconds: i32,
    /// Pause after an empty receive.
    pub poll_interval: Duration,
    /// Handlers allowed to run at once within a batch.
    pub max_concurrent: usize,
    /// Stop the loop on the first handler failure.
    pub fail_fast: bool,
}

impl DispatchConfig {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Self::default()
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_name: String::new(),
            tracker_capacity: 1024,
            batch_size: 10,
            visibility_timeout: 30,
            wait_seconds: 20,
            poll_interval: Duration::from_millis(500),
            max_concurrent: 1,
            fail_fast: false,
        }
    }
}

/// What happened to one message.
#[derive(Debug)]
pub enum MessageOutcome {
    /// Already tracked; acknowledged without running the handler.
    Duplicate(JobState),
    /// Handler ran and succeeded; acknowledged.
    Succeeded,
    /// Handler failed; left on the queue for redelivery.
    Failed(Error),
}

impl MessageOutcome {
    pub fn should_ack(&self) -> bool {
        !matches!(self, MessageOutcome::Failed(_))
    }

    fn label(&self) -> &'static str {
        match self {
            MessageOutcome::Duplicate(JobState::Completed) => "duplicate_completed",
            MessageOutcome::Duplicate(_) => "duplicate_running",
            MessageOutcome::Succeeded => "succeeded",
            MessageOutcome::Failed(_) => "failed",
        }
    }
}

/// Tally of one [`Dispatcher::dispatch_batch`] call.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub received: usize,
    pub duplicates: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Messages the queue confirmed deleted.
    pub deleted: usize,
    /// Handler errors by message id, in completion order.
    pub failures: Vec<(i64, Error)>,
}

/// Pulls batches from a [`MessageQueue`] and runs a [`Handler`] per new message.
pub struct Dispatcher<Q, H> {
    queue: Arc<Q>,
    handler: Arc<H>,
    tracker: Arc<JobTracker>,
    config: DispatchConfig,
    queue_name: Arc<str>,
    limiter: Arc<Semaphore>,
    shutdown: Arc<Notify>,
}

impl<Q, H> Clone for Dispatcher<Q, H> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            handler: Arc::clone(&self.handler),
            tracker: Arc::clone(&self.tracker),
            config: self.config.clone(),
            queue_name: Arc::clone(&self.queue_name),
            limiter: Arc::clone(&self.limiter),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<Q: MessageQueue, H: Handler> Dispatcher<Q, H> {
    pub fn new(queue: Arc<Q>, handler: Arc<H>, config: DispatchConfig) -> Self {
        let tracker = Arc::new(JobTracker::new(config.tracker_capacity));
        let limiter = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let queue_name = Arc::from(config.queue_name.as_str());
        Self {
            queue,
            handler,
            tracker,
            config,
            queue_name,
            limiter,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Signal the dispatcher to stop after the current batch.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run until shutdown, a receive error, or (with `fail_fast`) a
    /// handler failure. Closes the job tracker on the way out.
    pub async fn run(&self) -> Result<()> {
        info!(
            queue = %self.queue_name,
            tracker_capacity = self.config.tracker_capacity,
            max_concurrent = self.config.max_concurrent,
            "dispatcher started"
        );
        let result = self.run_loop().await;
        // No handler is in flight here: every batch is joined before the
        // loop continues or returns.
        self.tracker.close();
        result
    }

    async fn run_loop(&self) -> Result<()> {
        let cfg = &self.config;
        loop {
            let messages = tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!("dispatcher shutting down");
                    return Ok(());
                }
                received = self.queue.receive(
                    &cfg.queue_name,
                    cfg.batch_size,
                    cfg.visibility_timeout,
                    cfg.wait_seconds,
                ) => received?,
            };

            if messages.is_empty() {
                tokio::select! {
                    biased;
                    _ = self.shutdown.notified() => {
                        info!("dispatcher shutting down");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(cfg.poll_interval) => {}
                }
                continue;
            }

            let report = self.dispatch_batch(messages).await;
            if cfg.fail_fast
                && let Some((msg_id, err)) = report.failures.into_iter().next()
            {
                error!(msg_id, error = %err, "handler failed, stopping (fail-fast)");
                return Err(err);
            }
        }
    }

    /// Handle one received batch and delete every message that needs no
    /// further work. Returns once all handlers for the batch have finished.
    pub async fn dispatch_batch(&self, messages: Vec<QueueMessage>) -> BatchReport {
        let mut report = BatchReport {
            received: messages.len(),
            ..BatchReport::default()
        };
        metrics::messages_received().add(
            messages.len() as u64,
            &[KeyValue::new("queue", self.queue_name.to_string())],
        );

        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();
        for msg in messages {
            let msg_id = msg.msg_id;
            let handle = tasks.spawn(process_message(
                Arc::clone(&self.queue_name),
                Arc::clone(&self.tracker),
                Arc::clone(&self.handler),
                Arc::clone(&self.limiter),
                msg,
            ));
            in_flight.insert(handle.id(), msg_id);
        }

        let mut ack = Vec::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (task_id, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // The handler task panicked. Forget the claim so a
                    // redelivery can try again.
                    let msg_id = in_flight.remove(&e.id()).unwrap_or_default();
                    error!(msg_id, error = %e, "message task aborted");
                    self.tracker.fail(&msg_id.to_string());
                    report.failed += 1;
                    report
                        .failures
                        .push((msg_id, Error::Other(format!("message task aborted: {e}"))));
                    continue;
                }
            };
            let Some(msg_id) = in_flight.remove(&task_id) else {
                continue;
            };
            if outcome.should_ack() {
                ack.push(msg_id);
            }
            match outcome {
                MessageOutcome::Duplicate(_) => report.duplicates += 1,
                MessageOutcome::Succeeded => report.succeeded += 1,
                MessageOutcome::Failed(e) => {
                    report.failed += 1;
                    report.failures.push((msg_id, e));
                }
            }
        }

        if !ack.is_empty() {
            report.deleted = self.acknowledge(&ack).await;
        }

        info!(
            received = report.received,
            duplicates = report.duplicates,
            succeeded = report.succeeded,
            failed = report.failed,
            deleted = report.deleted,
            "batch dispatched"
        );
        report
    }

    /// Delete acknowledged messages. A failed delete is only logged: the
    /// messages come back and are suppressed as duplicates.
    async fn acknowledge(&self, msg_ids: &[i64]) -> usize {
        match self.queue.delete_batch(&self.queue_name, msg_ids).await {
            Ok(deleted) => {
                if deleted.len() < msg_ids.len() {
                    warn!(
                        requested = msg_ids.len(),
                        deleted = deleted.len(),
                        "some acknowledged messages were already gone"
                    );
                }
                metrics::messages_deleted().add(
                    deleted.len() as u64,
                    &[KeyValue::new("queue", self.queue_name.to_string())],
                );
                deleted.len()
            }
            Err(e) => {
                error!(count = msg_ids.len(), error = %e, "failed to delete messages");
                0
            }
        }
    }
}

/// Dedup check, handler run, and tracker update for one message.
async fn process_message<H: Handler>(
    queue_name: Arc<str>,
    tracker: Arc<JobTracker>,
    handler: Arc<H>,
    limiter: Arc<Semaphore>,
    msg: QueueMessage,
) -> MessageOutcome {
    let id = msg.id();
    let span = start_message_span(&queue_name, &id, msg.read_ct);

    let outcome = async {
        let state = tracker.start_try(&id);
        record_decision(&span, state);
        if !state.is_started() {
            info!(id = %id, state = %state, "duplicate delivery, skipping handler");
            return MessageOutcome::Duplicate(state);
        }

        let _permit = match limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                tracker.fail(&id);
                return MessageOutcome::Failed(Error::Other(format!("handler limiter closed: {e}")));
            }
        };

        let start = Instant::now();
        let result = handler.handle(&id, &msg.body()).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        metrics::handler_duration_ms().record(
            duration_ms as f64,
            &[
                KeyValue::new("queue", queue_name.to_string()),
                KeyValue::new("success", result.is_ok()),
            ],
        );

        match result {
            Ok(()) => {
                tracker.complete(&id);
                info!(id = %id, duration_ms, "handler completed");
                MessageOutcome::Succeeded
            }
            Err(e) => {
                tracker.fail(&id);
                warn!(id = %id, duration_ms, error = %e, "handler failed, leaving message for redelivery");
                MessageOutcome::Failed(e)
            }
        }
    }
    .instrument(span.clone())
    .await;

    record_outcome(&span, outcome.label());
    metrics::message_outcomes().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("outcome", outcome.label()),
        ],
    );
    outcome
}
