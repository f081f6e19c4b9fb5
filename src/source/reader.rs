use super::cursor::{Cursor, CursorStore, Position, SharedCursor};
use super::{ReadEvent, ReaderError};
use crate::config::types::ReadStart;
use std::collections::VecDeque;
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

#[derive(Debug, PartialEq, Eq)]
enum Rotation {
    None,
    /// Path now points at a different file, or at nothing
    Replaced,
    /// Same file, shorter than what we already read
    Truncated,
}

/// Tails one file, following it across rotation and truncation.
///
/// Lines are handed out only once their terminating newline has been read.
/// Each line's end is available from `position`; the shared cursor only
/// moves when the consumer commits one, so it never runs ahead of what has
/// actually been submitted.
pub struct SourceReader {
    source_id: String,
    path: PathBuf,
    start: ReadStart,
    poll_interval: Duration,

    file: Option<BufReader<File>>,
    partial: Vec<u8>,
    offset: u64,
    rotation_id: Option<u64>,
    restored: Option<Cursor>,
    /// The next open starts at offset 0 (after rotation, or a file that appeared late)
    reopen_from_start: bool,
    missing_logged: bool,
    /// Incremented on every (re)open and rewind; stale positions are rejected
    generation: u64,
    queued: VecDeque<(ReadEvent, Option<Position>)>,
    last_position: Option<Position>,

    cursor: SharedCursor,
    store: Arc<CursorStore>,
}

impl SourceReader {
    /// Prepare a reader for `path`, restoring the persisted cursor if there is one.
    ///
    /// The file itself is opened lazily by `next_event`, so a missing file is not an error.
    pub fn open(
        source_id: impl Into<String>,
        path: impl Into<PathBuf>,
        start: ReadStart,
        poll_interval: Duration,
        store: Arc<CursorStore>,
    ) -> Result<Self, ReaderError> {
        let source_id = source_id.into();
        let path = path.into();

        let restored = match store.load(&path) {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(source_id = %source_id, error = %e, "Ignoring unreadable cursor");
                None
            }
        };

        let mut reader = Self {
            source_id,
            cursor: Arc::new(Mutex::new(Cursor::new(&path))),
            path,
            start,
            poll_interval,
            file: None,
            partial: Vec::new(),
            offset: 0,
            rotation_id: None,
            restored,
            reopen_from_start: false,
            missing_logged: false,
            generation: 0,
            queued: VecDeque::new(),
            last_position: None,
            store,
        };
        reader.try_open()?;
        Ok(reader)
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read offset in the current file; may be ahead of the committed cursor
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// End of the line most recently returned by `next_event`. `None` for
    /// lines drained from a file that has since been rotated away.
    pub fn position(&self) -> Option<Position> {
        self.last_position
    }

    pub fn cursor(&self) -> SharedCursor {
        Arc::clone(&self.cursor)
    }

    /// Advance the committed cursor to `position` and persist it
    pub fn commit(&self, position: Position) {
        self.store.commit(&self.cursor, position);
    }

    pub fn persist(&self) {
        self.store.save_shared(&self.cursor);
    }

    /// Open the path if it exists. Returns false when the file is not there yet.
    fn try_open(&mut self) -> Result<bool, ReaderError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !self.missing_logged {
                    warn!(source_id = %self.source_id, path = %self.path.display(), "Log file not found, waiting for it");
                    self.missing_logged = true;
                }
                // Whatever shows up later was written after we started watching
                self.reopen_from_start = true;
                self.restored = None;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let metadata = file.metadata()?;
        let rotation_id = get_inode(&metadata);
        let len = metadata.len();

        let offset = if self.reopen_from_start {
            0
        } else {
            match self.restored.take() {
                Some(c) if c.rotation_id == rotation_id && c.offset <= len => {
                    info!(source_id = %self.source_id, offset = c.offset, "Resuming from cursor");
                    c.offset
                }
                Some(_) => {
                    info!(source_id = %self.source_id, "Cursor belongs to a rotated file, starting at end");
                    len
                }
                None => match self.start {
                    ReadStart::Beginning => 0,
                    ReadStart::End => len,
                },
            }
        };

        let mut buf_reader = BufReader::new(file);
        buf_reader.seek(SeekFrom::Start(offset))?;

        self.file = Some(buf_reader);
        self.offset = offset;
        self.rotation_id = Some(rotation_id);
        self.partial.clear();
        self.missing_logged = false;
        self.reset_cursor();

        debug!(source_id = %self.source_id, offset, rotation_id, "Opened log file");

        if self.reopen_from_start {
            self.reopen_from_start = false;
            self.persist();
        }
        Ok(true)
    }

    /// Wait for the next event from the file.
    ///
    /// Cancel-safe: all state lives in `self` and the only await is the poll sleep.
    pub async fn next_event(&mut self) -> Result<ReadEvent, ReaderError> {
        self.last_position = None;
        loop {
            if let Some((event, position)) = self.queued.pop_front() {
                self.last_position = position;
                return Ok(event);
            }

            if self.file.is_none() {
                match self.try_open() {
                    Ok(true) => {}
                    Ok(false) => {
                        sleep(self.poll_interval).await;
                        return Ok(ReadEvent::Idle);
                    }
                    Err(e) => {
                        warn!(source_id = %self.source_id, error = %e, "Failed to open log file, retrying");
                        sleep(self.poll_interval).await;
                        return Ok(ReadEvent::Idle);
                    }
                }
            }

            if let Some(line) = self.read_line()? {
                self.last_position = Some(self.current_position());
                return Ok(ReadEvent::Line(line));
            }

            match self.check_rotation()? {
                Rotation::None => {
                    sleep(self.poll_interval).await;
                    return Ok(ReadEvent::Idle);
                }
                Rotation::Replaced => {
                    info!(source_id = %self.source_id, path = %self.path.display(), "Log file rotated");
                    // Drain what the old handle still holds before letting go of it.
                    // These lines carry no position: the cursor moves to the new file.
                    while let Some(line) = self.read_line()? {
                        self.queued.push_back((ReadEvent::Line(line), None));
                    }
                    self.take_partial();
                    self.queued.push_back((ReadEvent::Rotated, None));

                    self.file = None;
                    self.rotation_id = None;
                    self.reopen_from_start = true;
                    self.try_open()?;
                }
                Rotation::Truncated => {
                    info!(source_id = %self.source_id, path = %self.path.display(), "Log file truncated");
                    self.take_partial();
                    self.queued.push_back((ReadEvent::Rotated, None));

                    if let Some(file) = self.file.as_mut() {
                        file.seek(SeekFrom::Start(0))?;
                    }
                    self.offset = 0;
                    self.reset_cursor();
                    self.persist();
                }
            }
        }
    }

    /// Read one complete line, keeping any unterminated tail in `partial`
    fn read_line(&mut self) -> Result<Option<String>, ReaderError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };

        let read = file.read_until(b'\n', &mut self.partial)?;
        if read == 0 || !self.partial.ends_with(b"\n") {
            return Ok(None);
        }

        let bytes = std::mem::take(&mut self.partial);
        self.offset += bytes.len() as u64;

        let line = String::from_utf8_lossy(&bytes);
        Ok(Some(line.trim_end_matches(&['\n', '\r'][..]).to_string()))
    }

    /// Queue an unterminated tail as a final line of the old file
    fn take_partial(&mut self) {
        if self.partial.is_empty() {
            return;
        }
        let bytes = std::mem::take(&mut self.partial);
        let line = String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_string();
        self.queued.push_back((ReadEvent::Line(line), None));
    }

    fn check_rotation(&mut self) -> Result<Rotation, ReaderError> {
        let Some(original) = self.rotation_id else {
            return Ok(Rotation::None);
        };

        match std::fs::metadata(&self.path) {
            Ok(metadata) => {
                if get_inode(&metadata) != original {
                    return Ok(Rotation::Replaced);
                }
                let read_to = self.offset + self.partial.len() as u64;
                if metadata.len() < read_to {
                    return Ok(Rotation::Truncated);
                }
                Ok(Rotation::None)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Rotation::Replaced),
            Err(e) => Err(e.into()),
        }
    }

    fn current_position(&self) -> Position {
        Position {
            offset: self.offset,
            rotation_id: self.rotation_id.unwrap_or(0),
            generation: self.generation,
        }
    }

    /// Point the committed cursor at the current read offset under a new generation
    fn reset_cursor(&mut self) {
        self.generation += 1;
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        cursor.offset = self.offset;
        cursor.rotation_id = self.rotation_id.unwrap_or(0);
        cursor.generation = self.generation;
    }
}

// Platform-specific rotation identity
#[cfg(unix)]
fn get_inode(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn get_inode(metadata: &Metadata) -> u64 {
    // No inode: hash creation time, falling back to modified time
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    if let Ok(created) = metadata.created().or_else(|_| metadata.modified()) {
        created.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const POLL: Duration = Duration::from_millis(10);

    fn reader(dir: &TempDir, path: &Path, start: ReadStart) -> SourceReader {
        let store = Arc::new(CursorStore::new(Some(dir.path().join("cursors"))));
        SourceReader::open("test", path, start, POLL, store).unwrap()
    }

    async fn next_line(reader: &mut SourceReader) -> Option<String> {
        for _ in 0..50 {
            match reader.next_event().await.unwrap() {
                ReadEvent::Line(line) => return Some(line),
                ReadEvent::Idle | ReadEvent::Rotated => continue,
                ReadEvent::Closed => return None,
            }
        }
        None
    }

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    #[tokio::test]
    async fn test_reads_from_beginning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "first\nsecond\n");

        let mut r = reader(&dir, &path, ReadStart::Beginning);
        assert_eq!(next_line(&mut r).await.as_deref(), Some("first"));
        assert_eq!(next_line(&mut r).await.as_deref(), Some("second"));
        assert_eq!(r.offset(), 13);
        assert!(matches!(r.next_event().await.unwrap(), ReadEvent::Idle));
    }

    #[tokio::test]
    async fn test_start_at_end_skips_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "old\n");

        let mut r = reader(&dir, &path, ReadStart::End);
        assert!(matches!(r.next_event().await.unwrap(), ReadEvent::Idle));
        append(&path, "new\n");
        assert_eq!(next_line(&mut r).await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "hel");

        let mut r = reader(&dir, &path, ReadStart::Beginning);
        assert!(matches!(r.next_event().await.unwrap(), ReadEvent::Idle));
        assert_eq!(r.offset(), 0);

        append(&path, "lo\n");
        assert_eq!(next_line(&mut r).await.as_deref(), Some("hello"));
        assert_eq!(r.offset(), 6);
    }

    #[tokio::test]
    async fn test_resumes_from_persisted_cursor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "a\nb\n");

        let mut r = reader(&dir, &path, ReadStart::Beginning);
        assert_eq!(next_line(&mut r).await.as_deref(), Some("a"));
        r.commit(r.position().unwrap());
        drop(r);

        append(&path, "c\n");
        let mut r = reader(&dir, &path, ReadStart::End);
        assert_eq!(next_line(&mut r).await.as_deref(), Some("b"));
        assert_eq!(next_line(&mut r).await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_truncation_restarts_at_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "one\ntwo\n");

        let mut r = reader(&dir, &path, ReadStart::Beginning);
        assert_eq!(next_line(&mut r).await.as_deref(), Some("one"));
        assert_eq!(next_line(&mut r).await.as_deref(), Some("two"));

        std::fs::write(&path, "x\n").unwrap();
        let mut saw_rotated = false;
        let line = loop {
            match r.next_event().await.unwrap() {
                ReadEvent::Rotated => saw_rotated = true,
                ReadEvent::Line(line) => break line,
                _ => {}
            }
        };
        assert!(saw_rotated);
        assert_eq!(line, "x");
    }

    #[tokio::test]
    async fn test_missing_file_is_read_once_it_appears() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.log");

        let mut r = reader(&dir, &path, ReadStart::End);
        assert!(matches!(r.next_event().await.unwrap(), ReadEvent::Idle));

        append(&path, "hello\n");
        assert_eq!(next_line(&mut r).await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_reading_does_not_commit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "a\nb\n");

        let mut r = reader(&dir, &path, ReadStart::Beginning);
        assert_eq!(next_line(&mut r).await.as_deref(), Some("a"));
        let after_a = r.position().unwrap();
        assert_eq!(next_line(&mut r).await.as_deref(), Some("b"));
        assert_eq!(r.offset(), 4);
        assert_eq!(r.cursor().lock().unwrap().offset, 0);

        r.commit(after_a);
        assert_eq!(r.cursor().lock().unwrap().offset, 2);
        drop(r);

        // Only the committed line is skipped on restart
        let mut r = reader(&dir, &path, ReadStart::End);
        assert_eq!(next_line(&mut r).await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_rotation_drains_old_file_before_switching() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "a\n");

        let mut r = reader(&dir, &path, ReadStart::Beginning);
        assert_eq!(next_line(&mut r).await.as_deref(), Some("a"));
        let old_position = r.position().unwrap();
        assert!(matches!(r.next_event().await.unwrap(), ReadEvent::Idle));

        // Written to the old file after EOF was reached, then rotated away
        // before the next poll; "c" never gets its newline.
        append(&path, "b\nc");
        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        append(&path, "d\n");

        let mut events = Vec::new();
        while events.len() < 4 {
            match r.next_event().await.unwrap() {
                ReadEvent::Idle => continue,
                event => events.push((event, r.position())),
            }
        }

        assert_eq!(events[0].0, ReadEvent::Line("b".to_string()));
        assert_eq!(events[1], (ReadEvent::Line("c".to_string()), None));
        assert_eq!(events[2], (ReadEvent::Rotated, None));
        assert_eq!(events[3].0, ReadEvent::Line("d".to_string()));

        // The new file is persisted at once; positions from the old file no longer apply
        let store = CursorStore::new(Some(dir.path().join("cursors")));
        let persisted = store.load(&path).unwrap().unwrap();
        assert_eq!(persisted.offset, 0);
        r.commit(old_position);
        assert_eq!(r.cursor().lock().unwrap().offset, 0);

        let new_position = events[3].1.unwrap();
        assert_eq!(new_position.offset, 2);
        r.commit(new_position);
        assert_eq!(store.load(&path).unwrap().unwrap().offset, 2);
    }
}
