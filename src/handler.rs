//! Message handlers: run a command per message body.

use std::ffi::OsString;
use std::future::Future;
use std::process::Stdio;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Something that performs the side effect for one message.
///
/// `Ok(())` means the message may be acknowledged.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, id: &str, body: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Spawns `program args...`, writes the message body to its stdin, and
/// waits for it. Stdout and stderr are inherited.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandHandler {
    pub fn new<I, S>(program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }
}

impl Handler for CommandHandler {
    async fn handle(&self, id: &str, body: &str) -> Result<()> {
        let start = Instant::now();
        let program = self.program.to_string_lossy();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("SQS_NOTIFY_MESSAGE_ID", id)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Handler(format!("failed to spawn {program}: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Handler("child stdin was not captured".to_string()))?;

        // Feed stdin while waiting so a child that exits early cannot
        // leave us blocked on a full pipe.
        let write = async move {
            let res = stdin.write_all(body.as_bytes()).await;
            drop(stdin);
            res
        };
        let (written, status) = tokio::join!(write, child.wait());
        let status = status?;

        if let Err(e) = written {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                debug!(id, "handler closed stdin before reading the whole body");
            } else {
                warn!(id, error = %e, "failed to write message body to handler");
                return Err(Error::Handler(format!("write to {program} stdin: {e}")));
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        if status.success() {
            debug!(id, %program, duration_ms, "handler succeeded");
            Ok(())
        } else {
            Err(Error::Handler(format!(
                "{program} exited with status {}",
                status.code().unwrap_or(-1)
            )))
        }
    }
}
