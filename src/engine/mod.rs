//! Dispatch engine: queue polling, dedup, handler runs, acknowledgement.

pub mod dispatch;

pub use dispatch::{BatchReport, DispatchConfig, Dispatcher, MessageOutcome};
