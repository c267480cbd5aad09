//! Queue abstraction used by the dispatcher.
//!
//! The production backend is pgmq ([`crate::db::Db`]); tests plug in an
//! in-memory queue.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::Result;

/// A message read from the queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub msg_id: i64,
    /// How many times this message has been read, this delivery included.
    pub read_ct: i32,
    pub enqueued_at: DateTime<Utc>,
    /// Visibility deadline. Unacknowledged messages reappear after it.
    pub vt: DateTime<Utc>,
    pub message: serde_json::Value,
}

impl QueueMessage {
    /// Idempotency key for the job tracker.
    pub fn id(&self) -> String {
        self.msg_id.to_string()
    }

    /// Text handed to the handler on stdin.
    ///
    /// JSON strings are unwrapped; any other payload is passed as compact JSON.
    pub fn body(&self) -> String {
        match &self.message {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Receive and acknowledge operations the dispatch loop needs.
pub trait MessageQueue: Send + Sync + 'static {
    /// Receive up to `max_messages`, hiding them for `visibility_timeout`
    /// seconds. May wait up to `wait_seconds` for the first message.
    fn receive(
        &self,
        queue: &str,
        max_messages: i32,
        visibility_timeout: i32,
        wait_seconds: i32,
    ) -> impl Future<Output = Result<Vec<QueueMessage>>> + Send;

    /// Delete acknowledged messages. Returns the ids actually deleted.
    fn delete_batch(
        &self,
        queue: &str,
        msg_ids: &[i64],
    ) -> impl Future<Output = Result<Vec<i64>>> + Send;
}
