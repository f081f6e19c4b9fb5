use crate::config::parse::{load_config, validate_config, ConfigError};
use crate::config::types::{Config, SourceConfig};
use crate::format::LogFormat;
use crate::pipeline::{Pipeline, PipelineError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Source selection from the command line; overrides configured sources
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub format: Option<LogFormat>,
    pub file: Option<PathBuf>,
    pub journal: bool,
    pub stdin: bool,
}

impl RunOverrides {
    fn apply(&self, config: &mut Config) {
        if let Some(format) = self.format {
            config.format = format;
        }

        let source = if let Some(path) = &self.file {
            Some(("file".to_string(), SourceConfig::file(path)))
        } else if self.journal {
            Some((
                "journal".to_string(),
                SourceConfig::process(
                    "journalctl",
                    vec!["-f".into(), "-n".into(), "0".into(), "-o".into(), "short-iso".into()],
                ),
            ))
        } else if self.stdin {
            Some(("stdin".to_string(), SourceConfig::stdin()))
        } else {
            None
        };

        if let Some((id, source)) = source {
            config.sources.clear();
            config.sources.insert(id, source);
        }
    }
}

pub async fn run(config_path: Option<PathBuf>, overrides: RunOverrides) -> Result<(), Box<dyn std::error::Error>> {
    run_pipeline(config_path.as_deref(), &overrides)
        .await
        .map_err(|e| e.into())
}

async fn run_pipeline(config_path: Option<&Path>, overrides: &RunOverrides) -> Result<(), RunError> {
    let mut config = match config_path {
        Some(path) => {
            info!(config_path = %path.display(), "Loading configuration");
            load_config(path)?
        }
        None => {
            warn!("No config file found, using built-in defaults");
            Config::default()
        }
    };
    overrides.apply(&mut config);
    validate_config(&config)?;

    if config.ai.endpoints.iter().all(|e| !e.enabled) {
        warn!("Running with rules only; unmatched records will be filtered");
    }

    let pipeline = Pipeline::new(config)?;
    let cancel = CancellationToken::new();

    let task_cancel = cancel.clone();
    let mut handle = tokio::spawn(async move { pipeline.run(task_cancel).await });

    info!("Pipeline started, press Ctrl+C to shutdown");

    let result = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            cancel.cancel();
            handle.await?
        }
        result = &mut handle => result?,
    };

    match &result {
        Ok(()) => info!("Pipeline shutdown complete"),
        Err(e) => error!(error = %e, "Pipeline error"),
    }
    result.map_err(RunError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::SourceType;

    #[test]
    fn test_file_override_replaces_sources() {
        let mut config = Config::default();
        config.sources.insert("old".into(), SourceConfig::stdin());

        RunOverrides {
            format: Some(LogFormat::Java),
            file: Some(PathBuf::from("/tmp/app.log")),
            ..RunOverrides::default()
        }
        .apply(&mut config);

        assert_eq!(config.format, LogFormat::Java);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources["file"].source_type, SourceType::File);
    }

    #[test]
    fn test_journal_override_spawns_journalctl() {
        let mut config = Config::default();
        RunOverrides {
            journal: true,
            ..RunOverrides::default()
        }
        .apply(&mut config);

        let source = &config.sources["journal"];
        assert_eq!(source.source_type, SourceType::Process);
        assert_eq!(source.command.as_deref(), Some("journalctl"));
    }

    #[test]
    fn test_no_override_keeps_config_sources() {
        let mut config = Config::default();
        config.sources.insert("app".into(), SourceConfig::file("/var/log/app.log"));
        RunOverrides::default().apply(&mut config);
        assert!(config.sources.contains_key("app"));
    }
}
