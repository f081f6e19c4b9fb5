use super::queue::Priority;
use crate::batch::Batch;
use crate::pipeline::PipelineContext;
use crate::record::Record;
use crate::verdict::{Verdict, VerdictSource, REASON_RESULT_MISSING};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

pub(crate) struct Job {
    pub id: Uuid,
    pub batch: Batch,
    pub priority: Priority,
    pub submitted_at: Instant,
    pub reply: oneshot::Sender<Vec<Verdict>>,
}

pub(crate) struct WorkerHandle {
    pub id: usize,
    pub inbox: mpsc::Sender<Job>,
    pub task: JoinHandle<()>,
}

/// Outcome of one job
pub(crate) struct Classified {
    pub verdicts: Vec<Verdict>,
    /// False when the classifier failed and fallback verdicts were substituted
    pub ok: bool,
}

/// Classify every record of a batch: cache first, then rules, then one
/// classifier call for whatever is left. Important records are handed to
/// the notifier.
pub(crate) async fn classify_batch(ctx: &PipelineContext, batch: &Batch) -> Classified {
    let mut verdicts: Vec<Option<Verdict>> = vec![None; batch.records.len()];
    let mut deferred: Vec<(usize, String)> = Vec::new();

    for (i, record) in batch.records.iter().enumerate() {
        let key = record.content_key();
        if let Some(hit) = ctx.cache.get(&key) {
            verdicts[i] = Some(hit);
            continue;
        }
        if let Some(verdict) = ctx.rules.filter(&record.content) {
            ctx.cache.set(key, verdict.clone(), ctx.rule_ttl);
            verdicts[i] = Some(verdict);
            continue;
        }
        deferred.push((i, key));
    }

    let mut ok = true;
    if !deferred.is_empty() {
        let records: Vec<Record> = deferred
            .iter()
            .map(|(i, _)| batch.records[*i].clone())
            .collect();
        let format = ctx.format_for(&batch.source_id);

        match ctx.classifier.classify(format, &records).await {
            Ok(results) => {
                for ((i, key), verdict) in deferred.into_iter().zip(results) {
                    // Fallbacks stay uncached so the record is retried next time it appears
                    if verdict.source == VerdictSource::Ai {
                        ctx.cache.set(key, verdict.clone(), ctx.ai_ttl);
                    }
                    verdicts[i] = Some(verdict);
                }
            }
            Err(e) => {
                warn!(
                    batch_id = %batch.id,
                    records = records.len(),
                    error = %e,
                    "Classification failed, filtering batch"
                );
                ok = false;
                let reason = format!("classification failed: {}", e);
                for (i, _) in deferred {
                    verdicts[i] = Some(Verdict::fallback(reason.clone()));
                }
            }
        }
    }

    let verdicts: Vec<Verdict> = verdicts
        .into_iter()
        .map(|v| v.unwrap_or_else(|| Verdict::fallback(REASON_RESULT_MISSING)))
        .collect();

    for (record, verdict) in batch.records.iter().zip(&verdicts) {
        if !verdict.should_filter {
            ctx.notifier.notify(&verdict.summary, &record.content).await;
        }
    }

    debug!(
        batch_id = %batch.id,
        records = verdicts.len(),
        important = verdicts.iter().filter(|v| !v.should_filter).count(),
        "Batch classified"
    );

    Classified { verdicts, ok }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiError, Classifier};
    use crate::config::types::CacheConfig;
    use crate::format::LogFormat;
    use crate::notify::CollectingNotifier;
    use crate::rules::{RuleAction, RuleDefinition, RuleEngine};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingClassifier {
        calls: AtomicUsize,
        records: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Classifier for CountingClassifier {
        async fn classify(&self, _format: LogFormat, records: &[Record]) -> Result<Vec<Verdict>, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.records.fetch_add(records.len(), Ordering::SeqCst);
            if self.fail {
                return Err(AiError::Exhausted);
            }
            Ok(records
                .iter()
                .map(|r| {
                    let important = r.content.contains("ERROR");
                    Verdict::from_ai(!important, format!("summary of {}", r.content), "test".into(), Some(0.9))
                })
                .collect())
        }
    }

    fn context(fail: bool) -> (PipelineContext, Arc<CountingClassifier>, Arc<CollectingNotifier>) {
        let classifier = Arc::new(CountingClassifier {
            calls: AtomicUsize::new(0),
            records: AtomicUsize::new(0),
            fail,
        });
        let notifier = CollectingNotifier::new();
        let rules = RuleEngine::new(
            vec![RuleDefinition::new("noise", r"^DEBUG", RuleAction::Filter, 10)],
            100,
        );
        let ctx = PipelineContext::new(
            LogFormat::Generic,
            rules,
            classifier.clone(),
            notifier.clone(),
            &CacheConfig::default(),
        );
        (ctx, classifier, notifier)
    }

    fn batch(lines: &[&str]) -> Batch {
        Batch {
            id: Uuid::new_v4(),
            source_id: "s".to_string(),
            records: lines.iter().map(|l| Record::new(*l, "s")).collect(),
            formed_at: Utc::now(),
            end: None,
        }
    }

    #[tokio::test]
    async fn test_rules_short_circuit_classifier() {
        let (ctx, classifier, notifier) = context(false);
        let out = classify_batch(&ctx, &batch(&["DEBUG noise", "ERROR boom", "INFO fine"])).await;

        assert!(out.ok);
        assert_eq!(out.verdicts.len(), 3);
        assert_eq!(out.verdicts[0].source, VerdictSource::Rule);
        assert!(out.verdicts[0].should_filter);
        assert!(!out.verdicts[1].should_filter);
        assert!(out.verdicts[2].should_filter);

        // One call for the two deferred records
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(classifier.records.load(Ordering::SeqCst), 2);

        let sent = notifier.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "ERROR boom");
    }

    #[tokio::test]
    async fn test_cached_verdicts_skip_classifier() {
        let (ctx, classifier, _) = context(false);
        classify_batch(&ctx, &batch(&["INFO a"])).await;
        classify_batch(&ctx, &batch(&["INFO a"])).await;
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_classifier_failure_filters_and_skips_cache() {
        let (ctx, _, notifier) = context(true);
        let out = classify_batch(&ctx, &batch(&["ERROR a", "ERROR b"])).await;

        assert!(!out.ok);
        assert!(out
            .verdicts
            .iter()
            .all(|v| v.should_filter && v.source == VerdictSource::Fallback));
        assert!(ctx.cache.is_empty());
        assert!(notifier.notifications().is_empty());
    }
}
