//! # sqs-notify-rs
//!
//! Queue-driven command runner. Long-polls a pgmq queue, pipes every
//! message body into a command, and deletes the messages whose command
//! succeeded.
//!
//! Delivery is at-least-once, so [`jobs::JobTracker`] remembers recent
//! message ids and keeps a redelivered message from running its command
//! twice while the first run is in flight or after it succeeded.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handler;
pub mod jobs;
pub mod queue;
pub mod telemetry;
