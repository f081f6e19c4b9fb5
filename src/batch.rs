use crate::config::types::BatchConfig;
use crate::record::Record;
use crate::source::cursor::Position;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch sink closed for source {0}")]
    SinkClosed(String),
}

/// A group of records classified in one call.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: Uuid,
    pub source_id: String,
    pub records: Vec<Record>,
    pub formed_at: DateTime<Utc>,
    /// Source position just past the last line of these records, when known
    pub end: Option<Position>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Default)]
struct Pending {
    records: Vec<Record>,
    /// Set when the first record of the current batch arrives
    formed_at: Option<(Instant, DateTime<Utc>)>,
    end: Option<Position>,
}

/// Accumulates records into batches closed by size or by age.
///
/// A batch is flushed into the sink as soon as it holds `max_size` records, or
/// once `max_wait` has passed since its first record, whichever comes first.
/// The sink is bounded, so a slow consumer suspends `add`.
pub struct Batcher {
    source_id: String,
    max_size: usize,
    max_wait: Duration,
    pending: Mutex<Pending>,
    sink: mpsc::Sender<Batch>,
    armed: Notify,
}

impl Batcher {
    pub fn new(source_id: impl Into<String>, config: &BatchConfig, sink: mpsc::Sender<Batch>) -> Arc<Self> {
        Arc::new(Self {
            source_id: source_id.into(),
            max_size: config.max_size.max(1),
            max_wait: config.max_wait,
            pending: Mutex::new(Pending::default()),
            sink,
            armed: Notify::new(),
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Append a record, flushing before returning if the batch is full
    pub async fn add(&self, record: Record) -> Result<(), BatchError> {
        self.add_at(record, None).await
    }

    /// Append a record whose last line ends at `end` in the source
    pub async fn add_at(&self, record: Record, end: Option<Position>) -> Result<(), BatchError> {
        let mut pending = self.pending.lock().await;

        if pending.formed_at.is_none() {
            pending.formed_at = Some((Instant::now(), Utc::now()));
            self.armed.notify_one();
        }
        pending.records.push(record);
        if end.is_some() {
            pending.end = end;
        }

        if pending.records.len() >= self.max_size {
            trace!(source_id = %self.source_id, "Batch full");
            self.send(&mut pending).await?;
        }
        Ok(())
    }

    /// Flush whatever is pending. Returns whether a batch was sent.
    pub async fn flush(&self) -> Result<bool, BatchError> {
        let mut pending = self.pending.lock().await;
        if pending.records.is_empty() {
            return Ok(false);
        }
        self.send(&mut pending).await?;
        Ok(true)
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.records.len()
    }

    async fn send(&self, pending: &mut Pending) -> Result<(), BatchError> {
        let records = std::mem::take(&mut pending.records);
        let formed_at = pending
            .formed_at
            .take()
            .map(|(_, wall)| wall)
            .unwrap_or_else(Utc::now);

        let batch = Batch {
            id: Uuid::new_v4(),
            source_id: self.source_id.clone(),
            records,
            formed_at,
            end: pending.end.take(),
        };
        debug!(
            source_id = %self.source_id,
            batch_id = %batch.id,
            records = batch.len(),
            "Flushing batch"
        );

        self.sink
            .send(batch)
            .await
            .map_err(|_| BatchError::SinkClosed(self.source_id.clone()))
    }

    /// Start the age-based flush timer. It stops on cancellation; the owner is
    /// expected to call `flush` afterwards.
    pub fn spawn_timer(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let batcher = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let deadline = batcher
                    .pending
                    .lock()
                    .await
                    .formed_at
                    .map(|(at, _)| at + batcher.max_wait);

                match deadline {
                    None => {
                        tokio::select! {
                            _ = batcher.armed.notified() => {}
                            _ = cancel.cancelled() => break,
                        }
                    }
                    Some(deadline) => {
                        tokio::select! {
                            _ = tokio::time::sleep_until(deadline) => {
                                if let Err(e) = batcher.flush_if_due().await {
                                    debug!(error = %e, "Batch timer stopping");
                                    break;
                                }
                            }
                            _ = cancel.cancelled() => break,
                        }
                    }
                }
            }
        })
    }

    async fn flush_if_due(&self) -> Result<(), BatchError> {
        let mut pending = self.pending.lock().await;
        let due = match pending.formed_at {
            Some((at, _)) => at.elapsed() >= self.max_wait,
            None => false,
        };
        if due && !pending.records.is_empty() {
            trace!(source_id = %self.source_id, "Batch max wait reached");
            self.send(&mut pending).await?;
        }
        Ok(())
    }
}
