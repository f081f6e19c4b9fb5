use crate::format::RecordStart;
use crate::record::Record;
use tracing::debug;

pub const DEFAULT_MAX_LINES: usize = 500;

/// Joins continuation lines (stack frames, wrapped messages) into one record.
///
/// One merger per source; it is only ever touched by that source's driver.
#[derive(Debug)]
pub struct LineMerger {
    source_id: String,
    strategy: RecordStart,
    max_lines: usize,
    pending: Option<PendingRecord>,
}

#[derive(Debug)]
struct PendingRecord {
    text: String,
    lines: usize,
}

impl LineMerger {
    pub fn new(source_id: impl Into<String>, strategy: RecordStart) -> Self {
        Self {
            source_id: source_id.into(),
            strategy,
            max_lines: DEFAULT_MAX_LINES,
            pending: None,
        }
    }

    /// Cap on lines per record; a record reaching it is completed even if
    /// more continuation lines follow.
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines.max(1);
        self
    }

    /// Feed one raw line. Returns the previous record when `line` starts a new one.
    pub fn add(&mut self, line: &str) -> Option<Record> {
        if self.strategy.is_new_record_start(line) {
            let completed = self.pending.take().map(|p| self.to_record(p));
            self.pending = Some(PendingRecord {
                text: line.to_string(),
                lines: 1,
            });
            return completed;
        }

        match &mut self.pending {
            Some(pending) => {
                pending.text.push('\n');
                pending.text.push_str(line);
                pending.lines += 1;
                if pending.lines >= self.max_lines {
                    debug!(source = %self.source_id, lines = pending.lines, "Record hit line cap, completing");
                    return self.flush();
                }
                None
            }
            None => {
                // Continuation with nothing to attach to: keep it as its own record
                self.pending = Some(PendingRecord {
                    text: line.to_string(),
                    lines: 1,
                });
                None
            }
        }
    }

    /// Emit and clear the pending record, if any
    pub fn flush(&mut self) -> Option<Record> {
        self.pending.take().map(|p| self.to_record(p))
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn to_record(&self, pending: PendingRecord) -> Record {
        Record::new(pending.text, self.source_id.clone())
    }
}
