use super::{ReadEvent, ReaderError};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

type BoxedReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Line source over a byte stream with no seekable position: a child
/// process's stdout or standard input. There is no cursor; the stream
/// reports `Closed` when it ends.
pub struct StreamSource {
    name: String,
    reader: BoxedReader,
    /// Bytes of a line whose newline has not arrived yet
    partial: Vec<u8>,
    child: Option<Child>,
    poll_interval: Duration,
    closed: bool,
}

impl StreamSource {
    /// Spawn `command` and read its stdout (e.g. `journalctl -f -o short-iso`).
    pub fn process(command: &str, args: &[String], poll_interval: Duration) -> Result<Self, ReaderError> {
        let mut child = Command::new(command)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ReaderError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| ReaderError::Spawn {
            command: command.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "stdout not captured"),
        })?;

        info!(command, pid = ?child.id(), "Spawned log process");
        Ok(Self {
            name: command.to_string(),
            reader: Box::new(BufReader::new(stdout)),
            partial: Vec::new(),
            child: Some(child),
            poll_interval,
            closed: false,
        })
    }

    pub fn stdin(poll_interval: Duration) -> Self {
        Self::from_reader("stdin", BufReader::new(tokio::io::stdin()), poll_interval)
    }

    pub fn from_reader<R>(name: impl Into<String>, reader: R, poll_interval: Duration) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self {
            name: name.into(),
            reader: Box::new(reader),
            partial: Vec::new(),
            child: None,
            poll_interval,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel-safe: partially read bytes stay in `partial` until the
    /// newline arrives. Invalid UTF-8 is replaced rather than dropped.
    pub async fn next_event(&mut self) -> Result<ReadEvent, ReaderError> {
        if self.closed {
            return Ok(ReadEvent::Closed);
        }

        let read = timeout(self.poll_interval, self.reader.read_until(b'\n', &mut self.partial)).await;
        match read {
            Err(_) => Ok(ReadEvent::Idle),
            Ok(Ok(0)) => {
                // A last line without a trailing newline still counts
                if !self.partial.is_empty() {
                    return Ok(ReadEvent::Line(self.take_line()));
                }
                self.closed = true;
                self.reap().await;
                Ok(ReadEvent::Closed)
            }
            Ok(Ok(_)) if self.partial.ends_with(b"\n") => Ok(ReadEvent::Line(self.take_line())),
            Ok(Ok(_)) => Ok(ReadEvent::Idle),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.partial);
        let line = String::from_utf8_lossy(&bytes);
        line.trim_end_matches('\n').trim_end_matches('\r').to_string()
    }

    async fn reap(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.wait().await {
                Ok(status) if status.success() => debug!(name = %self.name, "Log process exited"),
                Ok(status) => warn!(name = %self.name, %status, "Log process exited with failure"),
                Err(e) => warn!(name = %self.name, error = %e, "Failed to wait for log process"),
            }
        }
    }
}
