use super::PipelineError;
use crate::ai::{AiServiceManager, Classifier};
use crate::cache::ResultCache;
use crate::config::types::{CacheConfig, Config};
use crate::format::LogFormat;
use crate::notify::{self, Notifier};
use crate::rules::RuleEngine;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Shared services for one pipeline, built once and handed to every component.
///
/// Several independent contexts may live in one process.
pub struct PipelineContext {
    pub default_format: LogFormat,
    pub formats: HashMap<String, LogFormat>,
    pub cache: Arc<ResultCache>,
    pub rules: Arc<RuleEngine>,
    pub classifier: Arc<dyn Classifier>,
    pub notifier: Arc<dyn Notifier>,
    pub ai_ttl: Duration,
    pub rule_ttl: Duration,
}

impl PipelineContext {
    pub fn new(
        default_format: LogFormat,
        rules: RuleEngine,
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn Notifier>,
        cache: &CacheConfig,
    ) -> Self {
        Self {
            default_format,
            formats: HashMap::new(),
            cache: Arc::new(ResultCache::from_config(cache)),
            rules: Arc::new(rules),
            classifier,
            notifier,
            ai_ttl: cache.ai_ttl,
            rule_ttl: cache.rule_ttl,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let classifier: Arc<dyn Classifier> = Arc::new(AiServiceManager::new(&config.ai)?);
        let mut context = Self::new(
            config.format,
            RuleEngine::from_config(&config.rules),
            classifier,
            notify::from_kind(config.output.notifier),
            &config.cache,
        );
        for (id, source) in &config.sources {
            if let Some(format) = source.format {
                context.formats.insert(id.clone(), format);
            }
        }
        Ok(context)
    }

    pub fn with_source_format(mut self, source_id: impl Into<String>, format: LogFormat) -> Self {
        self.formats.insert(source_id.into(), format);
        self
    }

    pub fn format_for(&self, source_id: &str) -> LogFormat {
        self.formats.get(source_id).copied().unwrap_or(self.default_format)
    }
}
