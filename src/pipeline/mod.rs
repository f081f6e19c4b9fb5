pub mod context;
pub mod driver;

pub use context::PipelineContext;
pub use driver::{Driver, DriverStats};

use crate::ai::AiError;
use crate::batch::BatchError;
use crate::config::types::Config;
use crate::merge::LineMerger;
use crate::scheduler::Scheduler;
use crate::source::cursor::CursorStore;
use crate::source::{LogSource, ReaderError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Errors that can occur during pipeline operation
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("classifier setup failed: {0}")]
    Ai(#[from] AiError),

    #[error("source error: {0}")]
    Reader(#[from] ReaderError),

    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("task failed: {0}")]
    Task(String),

    #[error("no sources could be started")]
    NoSources,
}

/// Everything needed to run all configured sources against one context.
pub struct Pipeline {
    config: Config,
    context: Arc<PipelineContext>,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        let context = Arc::new(PipelineContext::from_config(&config)?);
        Ok(Self { config, context })
    }

    /// Use a prebuilt context, e.g. one with a substitute classifier
    pub fn with_context(config: Config, context: Arc<PipelineContext>) -> Self {
        Self { config, context }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    /// Run every source until `cancel` fires or all sources close, then
    /// drain the scheduler.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let config = &self.config;
        let services = CancellationToken::new();
        let sweeper = self
            .context
            .cache
            .spawn_sweeper(config.cache.cleanup_interval, services.clone());

        let scheduler = Scheduler::new(config.scheduler.clone(), Arc::clone(&self.context));
        scheduler.start();

        let store = Arc::new(CursorStore::new(config.reader.cursor_dir.clone()));
        let mut drivers = Vec::new();

        for (source_id, source_config) in &config.sources {
            let source = match LogSource::from_config(source_id, source_config, &config.reader, Arc::clone(&store)) {
                Ok(source) => source,
                Err(e) => {
                    error!(source_id = %source_id, error = %e, "Failed to start source");
                    continue;
                }
            };
            let format = self.context.format_for(source_id);
            let merger = LineMerger::new(source_id.clone(), format.record_start())
                .with_max_lines(config.reader.max_record_lines);

            info!(source_id = %source_id, %format, "Starting driver");
            let driver = Driver::new(
                source_id.clone(),
                source,
                merger,
                scheduler.clone(),
                Arc::clone(&store),
                config.reader.clone(),
                config.batch.clone(),
                config.scheduler.submit_retry,
            );
            let token = cancel.clone();
            drivers.push(tokio::spawn(async move { driver.run(token).await }));
        }

        if drivers.is_empty() {
            scheduler.shutdown().await;
            services.cancel();
            let _ = sweeper.await;
            return Err(PipelineError::NoSources);
        }

        info!(sources = drivers.len(), "Pipeline started");

        for result in futures::future::join_all(drivers).await {
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(error = %e, "Driver failed"),
                Err(e) => error!(error = %e, "Driver task panicked"),
            }
        }

        scheduler.shutdown().await;
        services.cancel();
        let _ = sweeper.await;

        let cache = self.context.cache.stats();
        let rules = self.context.rules.stats();
        let sched = scheduler.stats();
        info!(
            cache_hits = cache.hits,
            cache_misses = cache.misses,
            cache_hit_rate = cache.hit_rate,
            rule_cache_hits = rules.cache_hits,
            jobs_completed = sched.completed,
            jobs_failed = sched.failed,
            jobs_rejected = sched.rejected,
            "Pipeline shutdown complete"
        );
        Ok(())
    }
}
