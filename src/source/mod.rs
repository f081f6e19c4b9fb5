pub mod cursor;
pub mod reader;
pub mod stream;

use crate::config::types::{ReaderConfig, SourceConfig, SourceType};
use cursor::{CursorError, CursorStore, Position, SharedCursor};
use std::sync::Arc;
use thiserror::Error;

pub use reader::SourceReader;
pub use stream::StreamSource;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cursor error: {0}")]
    Cursor(#[from] CursorError),

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("source {0} is missing its {1}")]
    Incomplete(String, &'static str),
}

/// What a source produced on one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// One complete line, without its terminator
    Line(String),
    /// Nothing new within the poll interval
    Idle,
    /// The underlying file was rotated or truncated; pending records should be flushed
    Rotated,
    /// The stream ended and will produce nothing more
    Closed,
}

/// Any configured input
pub enum LogSource {
    File(SourceReader),
    Stream(StreamSource),
}

impl LogSource {
    pub fn from_config(
        source_id: &str,
        config: &SourceConfig,
        reader: &ReaderConfig,
        store: Arc<CursorStore>,
    ) -> Result<Self, ReaderError> {
        match config.source_type {
            SourceType::File => {
                let path = config
                    .path
                    .clone()
                    .ok_or(ReaderError::Incomplete(source_id.to_string(), "path"))?;
                Ok(LogSource::File(SourceReader::open(
                    source_id,
                    path,
                    config.start,
                    reader.poll_interval,
                    store,
                )?))
            }
            SourceType::Process => {
                let command = config
                    .command
                    .as_deref()
                    .ok_or(ReaderError::Incomplete(source_id.to_string(), "command"))?;
                Ok(LogSource::Stream(StreamSource::process(
                    command,
                    &config.args,
                    reader.poll_interval,
                )?))
            }
            SourceType::Stdin => Ok(LogSource::Stream(StreamSource::stdin(reader.poll_interval))),
        }
    }

    pub async fn next_event(&mut self) -> Result<ReadEvent, ReaderError> {
        match self {
            LogSource::File(reader) => reader.next_event().await,
            LogSource::Stream(stream) => stream.next_event().await,
        }
    }

    /// End of the line just returned, present only for files
    pub fn position(&self) -> Option<Position> {
        match self {
            LogSource::File(reader) => reader.position(),
            LogSource::Stream(_) => None,
        }
    }

    /// Committed position, present only for files
    pub fn cursor(&self) -> Option<SharedCursor> {
        match self {
            LogSource::File(reader) => Some(reader.cursor()),
            LogSource::Stream(_) => None,
        }
    }
}
