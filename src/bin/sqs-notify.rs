//! sqs-notify: run a command for every message on a queue.

use clap::Parser;
use secrecy::ExposeSecret;
use sqs_notify_rs::config::Config;
use sqs_notify_rs::config::file::FileConfig;
use sqs_notify_rs::db::Db;
use sqs_notify_rs::engine::{DispatchConfig, Dispatcher};
use sqs_notify_rs::handler::CommandHandler;
use sqs_notify_rs::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "sqs-notify",
    about = "Pipe each queue message into a command",
    after_help = "Environment variables:\n  DATABASE_URL   Postgres URL of the pgmq database (required)\n  OTEL_ENDPOINT  OTLP collector endpoint (optional)\n  LOG_LEVEL      default log filter when RUST_LOG is unset"
)]
struct Cli {
    /// Queue to consume
    queue: String,
    /// Command to run per message; the body is written to its stdin
    command: String,
    /// Arguments passed to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
    /// TOML file with dispatch settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Message ids remembered for dedup (0 disables)
    #[arg(long)]
    capacity: Option<i64>,
    /// Messages received per batch
    #[arg(long)]
    batch_size: Option<i32>,
    /// Seconds before an unacknowledged message is redelivered
    #[arg(long)]
    visibility_timeout: Option<i32>,
    /// Long-poll wait per receive, in seconds
    #[arg(long)]
    wait_seconds: Option<i32>,
    /// Commands allowed to run at once
    #[arg(long)]
    max_concurrent: Option<usize>,
    /// Exit on the first failed command
    #[arg(long)]
    fail_fast: bool,
    /// Create the queue (and the pgmq extension) if missing
    #[arg(long)]
    create_queue: bool,
}

impl Cli {
    fn dispatch_config(&self) -> anyhow::Result<DispatchConfig> {
        let mut config = DispatchConfig::default();
        if let Some(ref path) = self.config {
            FileConfig::load(path)?.apply(&mut config);
        }
        config.queue_name = self.queue.clone();
        if let Some(n) = self.capacity {
            config.tracker_capacity = n;
        }
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(n) = self.visibility_timeout {
            config.visibility_timeout = n;
        }
        if let Some(n) = self.wait_seconds {
            config.wait_seconds = n;
        }
        if let Some(n) = self.max_concurrent {
            config.max_concurrent = n;
        }
        if self.fail_fast {
            config.fail_fast = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "sqs-notify".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let dispatch = cli.dispatch_config()?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.health_check().await?;
    if cli.create_queue {
        db.ensure_pgmq().await?;
        db.create_queue(&dispatch.queue_name).await?;
    }

    let handler = CommandHandler::new(&cli.command, &cli.args);
    info!(
        queue = %dispatch.queue_name,
        command = %cli.command,
        "starting sqs-notify"
    );

    let dispatcher = Dispatcher::new(Arc::new(db), Arc::new(handler), dispatch);

    let ctrl = dispatcher.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    dispatcher.run().await?;
    Ok(())
}
