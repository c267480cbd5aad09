//! Optional TOML file with dispatch settings.
//!
//! ```toml
//! [dispatch]
//! queue = "notify"
//! tracker_capacity = 4096
//! max_concurrent = 4
//! ```
//!
//! Every key is optional. Command-line flags override file values.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::DispatchConfig;
use crate::error::{Error, Result};

/// Top-level TOML wrapper.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub dispatch: DispatchSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchSection {
    pub queue: Option<String>,
    pub tracker_capacity: Option<i64>,
    pub batch_size: Option<i32>,
    pub visibility_timeout: Option<i32>,
    pub wait_seconds: Option<i32>,
    pub poll_interval_ms: Option<u64>,
    pub max_concurrent: Option<usize>,
    pub fail_fast: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Overlay the values present in the file onto `config`.
    pub fn apply(&self, config: &mut DispatchConfig) {
        let d = &self.dispatch;
        if let Some(ref queue) = d.queue {
            config.queue_name = queue.clone();
        }
        if let Some(n) = d.tracker_capacity {
            config.tracker_capacity = n;
        }
        if let Some(n) = d.batch_size {
            config.batch_size = n;
        }
        if let Some(n) = d.visibility_timeout {
            config.visibility_timeout = n;
        }
        if let Some(n) = d.wait_seconds {
            config.wait_seconds = n;
        }
        if let Some(ms) = d.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = d.max_concurrent {
            config.max_concurrent = n;
        }
        if let Some(b) = d.fail_fast {
            config.fail_fast = b;
        }
    }
}
