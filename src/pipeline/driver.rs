use super::PipelineError;
use crate::batch::{Batch, Batcher};
use crate::config::types::{BatchConfig, ReaderConfig};
use crate::merge::LineMerger;
use crate::record::Record;
use crate::scheduler::{Priority, Scheduler, SchedulerError};
use crate::source::cursor::{CursorStore, Position, SharedCursor};
use crate::source::{LogSource, ReadEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters reported when a driver stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub lines: u64,
    pub records: u64,
    pub batches: u64,
}

/// Runs one source: read, merge, batch, then hand batches to the scheduler.
///
/// Ingestion and submission run in separate tasks so a scheduler under
/// backpressure only stalls this source once the batch channel fills up.
pub struct Driver {
    source_id: String,
    source: LogSource,
    merger: LineMerger,
    scheduler: Scheduler,
    store: Arc<CursorStore>,
    reader: ReaderConfig,
    batch: BatchConfig,
    submit_retry: Duration,
    /// Source position after the last line of the record held by the merger
    pending_end: Option<Position>,
}

impl Driver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_id: impl Into<String>,
        source: LogSource,
        merger: LineMerger,
        scheduler: Scheduler,
        store: Arc<CursorStore>,
        reader: ReaderConfig,
        batch: BatchConfig,
        submit_retry: Duration,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source,
            merger,
            scheduler,
            store,
            reader,
            batch,
            submit_retry,
            pending_end: None,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Run until cancelled or the source closes. Pending records are
    /// flushed through the merger and batcher before returning.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<DriverStats, PipelineError> {
        let (tx, rx) = mpsc::channel(self.batch.channel_capacity.max(1));
        let batcher = Batcher::new(self.source_id.clone(), &self.batch, tx);
        let timer_cancel = CancellationToken::new();
        let timer = batcher.spawn_timer(timer_cancel.clone());

        let cursor = self.source.cursor();
        let dispatch = tokio::spawn(dispatch_batches(
            rx,
            self.scheduler.clone(),
            cursor.clone(),
            Arc::clone(&self.store),
            self.submit_retry,
        ));

        info!(source_id = %self.source_id, "Driver started");

        let mut stats = DriverStats::default();
        let ingest = self.ingest(&batcher, &cancel, &mut stats).await;

        // Force out whatever is still buffered, in order: merger, then batcher
        self.flush_merger(&batcher, &mut stats).await?;
        batcher.flush().await?;
        timer_cancel.cancel();
        let _ = timer.await;
        drop(batcher);

        stats.batches = dispatch
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?;

        if let Some(cursor) = &cursor {
            self.store.save_shared(cursor);
        }

        info!(
            source_id = %self.source_id,
            lines = stats.lines,
            records = stats.records,
            batches = stats.batches,
            "Driver stopped"
        );
        ingest.map(|_| stats)
    }

    async fn ingest(
        &mut self,
        batcher: &Batcher,
        cancel: &CancellationToken,
        stats: &mut DriverStats,
    ) -> Result<(), PipelineError> {
        let mut last_line = Instant::now();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(source_id = %self.source_id, "Driver cancelled");
                    return Ok(());
                }
                event = self.source.next_event() => event,
            };

            match event {
                Ok(ReadEvent::Line(line)) => {
                    stats.lines += 1;
                    last_line = Instant::now();
                    let position = self.source.position();
                    let completed = self.merger.add(&line);
                    if let Some(record) = completed {
                        // A new record start leaves `line` pending; a line cap completes it
                        let end = if self.merger.has_pending() {
                            self.pending_end
                        } else {
                            position
                        };
                        emit(batcher, record, end, stats).await?;
                    }
                    self.pending_end = if self.merger.has_pending() { position } else { None };
                }
                Ok(ReadEvent::Idle) => {
                    if self.merger.has_pending() && last_line.elapsed() >= self.reader.merge_idle_flush {
                        self.flush_merger(batcher, stats).await?;
                    }
                }
                Ok(ReadEvent::Rotated) => {
                    self.flush_merger(batcher, stats).await?;
                }
                Ok(ReadEvent::Closed) => {
                    info!(source_id = %self.source_id, "Source closed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(source_id = %self.source_id, error = %e, "Read error, retrying");
                    tokio::time::sleep(self.reader.poll_interval).await;
                }
            }
        }
    }

    async fn flush_merger(&mut self, batcher: &Batcher, stats: &mut DriverStats) -> Result<(), PipelineError> {
        let end = self.pending_end.take();
        match self.merger.flush() {
            Some(record) => emit(batcher, record, end, stats).await,
            None => Ok(()),
        }
    }
}

async fn emit(
    batcher: &Batcher,
    record: Record,
    end: Option<Position>,
    stats: &mut DriverStats,
) -> Result<(), PipelineError> {
    stats.records += 1;
    batcher.add_at(record, end).await?;
    Ok(())
}

/// Submit each flushed batch, waiting out rejections, and commit the
/// cursor to the batch's end once it is in the scheduler's hands.
async fn dispatch_batches(
    mut batches: mpsc::Receiver<Batch>,
    scheduler: Scheduler,
    cursor: Option<SharedCursor>,
    store: Arc<CursorStore>,
    retry: Duration,
) -> u64 {
    let mut submitted = 0;

    while let Some(batch) = batches.recv().await {
        let priority = batch_priority(&batch);
        let source_id = batch.source_id.clone();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match scheduler.submit(batch.clone(), priority) {
                Ok(handle) => {
                    debug!(source_id = %source_id, job_id = %handle.id, ?priority, "Batch submitted");
                    submitted += 1;
                    if let (Some(cursor), Some(end)) = (&cursor, batch.end) {
                        store.commit(cursor, end);
                    }
                    break;
                }
                Err(SchedulerError::Stopped) => {
                    warn!(source_id = %source_id, records = batch.len(), "Scheduler stopped, dropping batch");
                    break;
                }
                Err(e) => {
                    if attempts == 1 {
                        debug!(source_id = %source_id, error = %e, "Batch rejected, will retry");
                    }
                    tokio::time::sleep(retry).await;
                }
            }
        }
    }

    submitted
}

/// Batches carrying fatal or error lines jump ahead of routine ones
pub fn batch_priority(batch: &Batch) -> Priority {
    let mut priority = Priority::Normal;
    for record in &batch.records {
        let upper = record.content.to_uppercase();
        if upper.contains("FATAL") || upper.contains("PANIC") || upper.contains("CRITICAL") {
            return Priority::Critical;
        }
        if upper.contains("ERROR") || upper.contains("EXCEPTION") {
            priority = Priority::High;
        }
    }
    priority
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn batch(lines: &[&str]) -> Batch {
        Batch {
            id: Uuid::new_v4(),
            source_id: "s".to_string(),
            records: lines.iter().map(|l| Record::new(*l, "s")).collect(),
            formed_at: Utc::now(),
            end: None,
        }
    }

    #[test]
    fn test_batch_priority() {
        assert_eq!(batch_priority(&batch(&["INFO ok"])), Priority::Normal);
        assert_eq!(batch_priority(&batch(&["INFO ok", "ERROR bad"])), Priority::High);
        assert_eq!(
            batch_priority(&batch(&["error first", "thread panicked: PANIC"])),
            Priority::Critical
        );
    }

    #[test]
    fn test_run_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        fn check(driver: Driver) {
            let run = driver.run(CancellationToken::new());
            assert_send(&run);
        }
        // Compile-time check: drivers are spawned onto the runtime
        let _ = check;
    }
}
