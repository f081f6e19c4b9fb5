use crate::config::types::NotifierKind;
use async_trait::async_trait;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Receives every record classified as important.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, summary: &str, content: &str);
}

pub fn from_kind(kind: NotifierKind) -> Arc<dyn Notifier> {
    match kind {
        NotifierKind::Stdout => Arc::new(StdoutNotifier),
        NotifierKind::Log => Arc::new(LogNotifier),
    }
}

/// Emits important records as warn-level tracing events
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, summary: &str, content: &str) {
        warn!(summary = %summary, content = %content, "Important log record");
    }
}

pub struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn notify(&self, summary: &str, content: &str) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let heading = if summary.is_empty() { "(no summary)" } else { summary };
        // A closed stdout is not worth failing the pipeline over
        let _ = writeln!(out, "== {}\n{}\n", heading, content);
    }
}

/// Keeps every notification in memory
#[derive(Default)]
pub struct CollectingNotifier {
    seen: Mutex<Vec<(String, String)>>,
}

impl CollectingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// (summary, content) pairs in arrival order
    pub fn notifications(&self) -> Vec<(String, String)> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, summary: &str, content: &str) {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((summary.to_string(), content.to_string()));
    }
}
