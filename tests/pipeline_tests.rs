use async_trait::async_trait;
use logsift::ai::{self, Classifier};
use logsift::config::types::{Config, ReadStart, SourceConfig};
use logsift::format::LogFormat;
use logsift::notify::CollectingNotifier;
use logsift::pipeline::{Pipeline, PipelineContext};
use logsift::record::Record;
use logsift::rules::{RuleAction, RuleDefinition, RuleEngine};
use logsift::source::cursor::CursorStore;
use logsift::verdict::Verdict;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Marks lines containing "boring" as noise and everything else as important
#[derive(Default)]
struct StubClassifier {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(&self, _format: LogFormat, records: &[Record]) -> ai::Result<Vec<Verdict>> {
        let mut seen = self.seen.lock().unwrap();
        Ok(records
            .iter()
            .map(|r| {
                seen.push(r.content.clone());
                Verdict::from_ai(
                    r.content.contains("boring"),
                    format!("ai: {}", r.content),
                    "stub".to_string(),
                    Some(0.9),
                )
            })
            .collect())
    }
}

fn test_config(dir: &TempDir, log_path: &Path) -> Config {
    let mut config = Config::default();
    config.format = LogFormat::Syslog;

    let mut source = SourceConfig::file(log_path);
    source.start = ReadStart::Beginning;
    config.sources.insert("app".to_string(), source);

    config.reader.poll_interval = Duration::from_millis(10);
    config.reader.merge_idle_flush = Duration::from_millis(30);
    config.reader.cursor_dir = Some(dir.path().join("cursors"));
    config.batch.max_size = 10;
    config.batch.max_wait = Duration::from_millis(50);
    // One worker keeps notification order equal to file order
    config.scheduler.min_workers = 1;
    config.scheduler.max_workers = 1;
    config.scheduler.initial_workers = 1;
    config.scheduler.scale_interval = Duration::from_secs(3600);
    config.scheduler.submit_retry = Duration::from_millis(10);
    config.rules.use_defaults = false;
    config
}

fn context(
    config: &Config,
    rules: Vec<RuleDefinition>,
) -> (Arc<PipelineContext>, Arc<StubClassifier>, Arc<CollectingNotifier>) {
    let classifier = Arc::new(StubClassifier::default());
    let notifier = CollectingNotifier::new();
    let ctx = PipelineContext::new(
        config.format,
        RuleEngine::new(rules, 64),
        classifier.clone(),
        notifier.clone(),
        &config.cache,
    );
    (Arc::new(ctx), classifier, notifier)
}

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.sync_all().unwrap();
}

async fn wait_for(notifier: &CollectingNotifier, count: usize) {
    for _ in 0..500 {
        if notifier.notifications().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} notifications, got {:?}",
        count,
        notifier.notifications()
    );
}

fn contents(notifier: &CollectingNotifier) -> Vec<String> {
    notifier.notifications().into_iter().map(|(_, content)| content).collect()
}

#[tokio::test]
async fn test_rules_and_classifier_end_to_end() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("app.log");
    append(
        &log_path,
        "disk usage boring check\nheartbeat ok\nOutOfMemoryError in worker\nconnection reset by peer\n",
    );

    let config = test_config(&dir, &log_path);
    let rules = vec![
        RuleDefinition::new("heartbeat", "heartbeat ok", RuleAction::Ignore, 5),
        RuleDefinition::new("oom", "OutOfMemoryError", RuleAction::Alert, 1),
    ];
    let (ctx, classifier, notifier) = context(&config, rules);

    let pipeline = Pipeline::with_context(config, ctx.clone());
    let cancel = CancellationToken::new();
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(cancel).await })
    };

    wait_for(&notifier, 2).await;
    cancel.cancel();
    run.await.unwrap().unwrap();

    assert_eq!(
        contents(&notifier),
        vec!["OutOfMemoryError in worker", "connection reset by peer"]
    );
    // Rule-decided lines never reach the classifier
    let seen = classifier.seen.lock().unwrap().clone();
    assert_eq!(seen, vec!["disk usage boring check", "connection reset by peer"]);

    let store = CursorStore::new(Some(dir.path().join("cursors")));
    let cursor = store.load(&log_path).unwrap().expect("cursor persisted");
    assert_eq!(cursor.offset, fs::metadata(&log_path).unwrap().len());
    assert!(ctx.cache.len() >= 3);
}

#[tokio::test]
async fn test_rotation_delivers_every_line_once() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("log.txt");
    append(&log_path, "line A\nline B\n");

    let config = test_config(&dir, &log_path);
    let (ctx, _, notifier) = context(&config, Vec::new());

    let pipeline = Pipeline::with_context(config, ctx);
    let cancel = CancellationToken::new();
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(cancel).await })
    };

    wait_for(&notifier, 2).await;

    fs::rename(&log_path, dir.path().join("log.txt.1")).unwrap();
    append(&log_path, "line C\n");

    wait_for(&notifier, 3).await;
    // Give a duplicate read a chance to show up before stopping
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    run.await.unwrap().unwrap();

    assert_eq!(contents(&notifier), vec!["line A", "line B", "line C"]);
}

#[tokio::test]
async fn test_restart_resumes_from_cursor() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("app.log");
    append(&log_path, "first\nsecond\n");

    let config = test_config(&dir, &log_path);

    let (ctx, _, first_run) = context(&config, Vec::new());
    let pipeline = Pipeline::with_context(config.clone(), ctx);
    let cancel = CancellationToken::new();
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(cancel).await })
    };
    wait_for(&first_run, 2).await;
    cancel.cancel();
    run.await.unwrap().unwrap();

    append(&log_path, "third\n");

    let (ctx, _, second_run) = context(&config, Vec::new());
    let pipeline = Pipeline::with_context(config, ctx);
    let cancel = CancellationToken::new();
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(cancel).await })
    };
    wait_for(&second_run, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    run.await.unwrap().unwrap();

    assert_eq!(contents(&first_run), vec!["first", "second"]);
    assert_eq!(contents(&second_run), vec!["third"]);
}

#[tokio::test]
async fn test_no_sources_is_an_error() {
    let mut config = Config::default();
    config.rules.use_defaults = false;
    let (ctx, _, _) = context(&config, Vec::new());

    let pipeline = Pipeline::with_context(config, ctx);
    let result = pipeline.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(logsift::pipeline::PipelineError::NoSources)));
}

#[tokio::test]
async fn test_restart_after_abort_replays_unsubmitted_record() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("app.log");
    append(&log_path, "first\nsecond\n");

    let mut config = test_config(&dir, &log_path);
    config.batch.max_size = 1;
    // "second" stays in the merger for the whole first run
    config.reader.merge_idle_flush = Duration::from_secs(30);

    let (ctx, _, first_run) = context(&config, Vec::new());
    let pipeline = Pipeline::with_context(config.clone(), ctx);
    let cancel = CancellationToken::new();
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(cancel).await })
    };
    wait_for(&first_run, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Both lines have been read, only "first" has been handed to the scheduler
    let store = CursorStore::new(Some(dir.path().join("cursors")));
    let cursor = store.load(&log_path).unwrap().expect("cursor persisted");
    assert_eq!(cursor.offset, "first\n".len() as u64);

    // What a crash at this moment would leave on disk
    let sidecar = store.sidecar_path(&log_path);
    let at_crash = fs::read(&sidecar).unwrap();

    cancel.cancel();
    run.await.unwrap().unwrap();
    assert_eq!(contents(&first_run), vec!["first", "second"]);
    fs::write(&sidecar, at_crash).unwrap();

    config.reader.merge_idle_flush = Duration::from_millis(30);
    let (ctx, _, second_run) = context(&config, Vec::new());
    let pipeline = Pipeline::with_context(config, ctx);
    let cancel = CancellationToken::new();
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(cancel).await })
    };
    wait_for(&second_run, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    run.await.unwrap().unwrap();

    assert_eq!(contents(&second_run), vec!["second"]);
    let cursor = store.load(&log_path).unwrap().expect("cursor persisted");
    assert_eq!(cursor.offset, fs::metadata(&log_path).unwrap().len());
}

#[tokio::test]
async fn test_stack_trace_pending_at_rotation_stays_whole() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("app.log");
    append(&log_path, "2025-01-02 10:00:00 ERROR payment failed\n");

    let mut config = test_config(&dir, &log_path);
    config.format = LogFormat::Java;
    config.reader.merge_idle_flush = Duration::from_secs(30);
    let (ctx, _, notifier) = context(&config, Vec::new());

    let pipeline = Pipeline::with_context(config, ctx);
    let cancel = CancellationToken::new();
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(cancel).await })
    };

    // Let the reader pick up the header line, then finish the trace and
    // rotate before the continuation can be polled normally
    tokio::time::sleep(Duration::from_millis(150)).await;
    append(&log_path, "\tat com.shop.Pay.charge(Pay.java:42)\n");
    fs::rename(&log_path, dir.path().join("app.log.1")).unwrap();
    append(&log_path, "2025-01-02 10:00:05 INFO retry scheduled\n");

    wait_for(&notifier, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    run.await.unwrap().unwrap();

    assert_eq!(
        contents(&notifier),
        vec![
            "2025-01-02 10:00:00 ERROR payment failed\n\tat com.shop.Pay.charge(Pay.java:42)",
            "2025-01-02 10:00:05 INFO retry scheduled",
        ]
    );

    // The new file's record was submitted at shutdown and committed
    let store = CursorStore::new(Some(dir.path().join("cursors")));
    let cursor = store.load(&log_path).unwrap().expect("cursor persisted");
    assert_eq!(cursor.offset, fs::metadata(&log_path).unwrap().len());
}
