//! pgmq queue operations via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send,
//! pgmq.read_with_poll, pgmq.delete.
//!
//! Messages not deleted before their visibility timeout expires are
//! handed out again; that is how failed messages get retried.

use crate::error::Result;
use crate::queue::{MessageQueue, QueueMessage};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Interval between pgmq polls while long-polling for messages.
const POLL_INTERVAL_MS: i32 = 100;

type MessageRow = (
    i64,
    i32,
    chrono::DateTime<chrono::Utc>,
    chrono::DateTime<chrono::Utc>,
    serde_json::Value,
);

fn record_op(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        record_op(queue_name, "create");
        Ok(())
    }

    /// Send a message to a pgmq queue. Returns the message ID.
    /// delay_seconds: 0 for immediate, >0 for delayed delivery.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
        delay_seconds: i32,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(queue_name)
            .bind(payload)
            .bind(delay_seconds)
            .fetch_one(&self.pool)
            .await?;
        record_op(queue_name, "send");
        Ok(row.0)
    }

    /// Read up to `qty` messages, long-polling for at most `wait_seconds`.
    /// Returned messages stay invisible for `vt_seconds`.
    pub async fn receive_batch(
        &self,
        queue_name: &str,
        vt_seconds: i32,
        qty: i32,
        wait_seconds: i32,
    ) -> Result<Vec<QueueMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT msg_id, read_ct, enqueued_at, vt, message
             FROM pgmq.read_with_poll($1, $2, $3, $4, $5)",
        )
        .bind(queue_name)
        .bind(vt_seconds)
        .bind(qty)
        .bind(wait_seconds)
        .bind(POLL_INTERVAL_MS)
        .fetch_all(&self.pool)
        .await?;

        let messages: Vec<QueueMessage> = rows
            .into_iter()
            .map(|(msg_id, read_ct, enqueued_at, vt, message)| QueueMessage {
                msg_id,
                read_ct,
                enqueued_at,
                vt,
                message,
            })
            .collect();

        record_op(
            queue_name,
            if messages.is_empty() {
                "receive_empty"
            } else {
                "receive"
            },
        );
        Ok(messages)
    }

    /// Delete messages permanently. Returns the ids pgmq actually removed.
    pub async fn delete_messages(&self, queue_name: &str, msg_ids: &[i64]) -> Result<Vec<i64>> {
        if msg_ids.is_empty() {
            return Ok(Vec::new());
        }
        let deleted: Vec<(i64,)> = sqlx::query_as("SELECT * FROM pgmq.delete($1, $2::bigint[])")
            .bind(queue_name)
            .bind(msg_ids)
            .fetch_all(&self.pool)
            .await?;
        record_op(queue_name, "delete");
        Ok(deleted.into_iter().map(|(id,)| id).collect())
    }
}

impl MessageQueue for super::Db {
    async fn receive(
        &self,
        queue: &str,
        max_messages: i32,
        visibility_timeout: i32,
        wait_seconds: i32,
    ) -> Result<Vec<QueueMessage>> {
        self.receive_batch(queue, visibility_timeout, max_messages, wait_seconds)
            .await
    }

    async fn delete_batch(&self, queue: &str, msg_ids: &[i64]) -> Result<Vec<i64>> {
        self.delete_messages(queue, msg_ids).await
    }
}
