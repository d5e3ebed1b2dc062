use std::process::Stdio;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use super::{FrameSink, FrameSource, ProviderTransport, TransportChannel};
use crate::error::RelayError;

/// Transport that spawns a local provider process and exchanges
/// newline-delimited frames over its stdin/stdout.
#[derive(Debug, Clone)]
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: Vec::new(),
        }
    }

    pub fn from_command(command: impl Into<String>) -> Self {
        Self::new(command, Vec::new())
    }

    /// Extra environment variables for the child process.
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl ProviderTransport for StdioTransport {
    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }

    async fn connect(&self) -> Result<TransportChannel, RelayError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::connection(self.describe(), format!("spawn failed: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RelayError::connection(self.describe(), "child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::connection(self.describe(), "child stdout unavailable"))?;
        debug!(command = %self.command, pid = ?child.id(), "spawned provider process");

        Ok(TransportChannel::new(
            StdioSink {
                label: self.describe(),
                writer: FramedWrite::new(stdin, LinesCodec::new()),
                child: Some(child),
            },
            StdioSource {
                label: self.describe(),
                reader: FramedRead::new(stdout, LinesCodec::new()),
            },
        ))
    }
}

struct StdioSink {
    label: String,
    writer: FramedWrite<ChildStdin, LinesCodec>,
    child: Option<Child>,
}

#[async_trait]
impl FrameSink for StdioSink {
    async fn send(&mut self, frame: String) -> Result<(), RelayError> {
        if self.child.is_none() {
            return Err(RelayError::Closed(self.label.clone()));
        }
        self.writer
            .send(frame)
            .await
            .map_err(|e| RelayError::connection(&self.label, e.to_string()))
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Err(e) = SinkExt::<String>::close(&mut self.writer).await {
            debug!(command = %self.label, error = %e, "closing provider stdin failed");
        }
        if let Err(e) = child.kill().await {
            warn!(command = %self.label, error = %e, "failed to stop provider process");
        }
        Ok(())
    }
}

struct StdioSource {
    label: String,
    reader: FramedRead<ChildStdout, LinesCodec>,
}

#[async_trait]
impl FrameSource for StdioSource {
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            let line = match self.reader.next().await? {
                Ok(line) => line,
                Err(e) => return Some(Err(RelayError::connection(&self.label, e.to_string()))),
            };
            if !line.trim().is_empty() {
                return Some(Ok(line));
            }
        }
    }
}
