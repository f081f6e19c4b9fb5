use super::types::*;
use crate::config::{env_var_regex, expand_env_vars, expand_tilde};
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string)
}

/// Parse config from a YAML string, expanding `$env{VAR}` and `~` first
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let mut unexpanded_vars: Vec<String> = env_var_regex()
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             Set it (e.g. export {0}=...) or replace $env{{{0}}} in the config file.",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             Set them or replace the references in the config file.",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

/// Expands tilde (~) in all path fields in the config.
fn expand_paths(config: &mut Config) {
    for source in config.sources.values_mut() {
        if let Some(path) = &source.path {
            source.path = Some(expand_tilde(path));
        }
    }

    if let Some(dir) = &config.reader.cursor_dir {
        config.reader.cursor_dir = Some(expand_tilde(dir));
    }

    config.rules.files = config.rules.files.iter().map(|p| expand_tilde(p)).collect();
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    for (id, source) in &config.sources {
        match source.source_type {
            SourceType::File if source.path.is_none() => {
                errors.push(format!("source '{}': file source requires 'path'", id));
            }
            SourceType::Process if source.command.as_deref().unwrap_or("").is_empty() => {
                errors.push(format!("source '{}': process source requires 'command'", id));
            }
            _ => {}
        }
    }

    let stdin_sources = config
        .sources
        .values()
        .filter(|s| s.source_type == SourceType::Stdin)
        .count();
    if stdin_sources > 1 {
        errors.push("at most one stdin source may be configured".to_string());
    }

    if config.batch.max_size == 0 {
        errors.push("batch.max_size must be at least 1".to_string());
    }
    if config.batch.max_wait.is_zero() {
        errors.push("batch.max_wait must be greater than zero".to_string());
    }
    if config.batch.channel_capacity == 0 {
        errors.push("batch.channel_capacity must be at least 1".to_string());
    }

    if config.cache.max_items == 0 {
        errors.push("cache.max_items must be at least 1".to_string());
    }
    if config.cache.cleanup_interval.is_zero() {
        errors.push("cache.cleanup_interval must be greater than zero".to_string());
    }

    let mut endpoint_names = HashSet::new();
    for endpoint in &config.ai.endpoints {
        if !endpoint_names.insert(endpoint.name.as_str()) {
            errors.push(format!("duplicate AI endpoint name '{}'", endpoint.name));
        }
        if !endpoint.endpoint.starts_with("http://") && !endpoint.endpoint.starts_with("https://") {
            errors.push(format!(
                "AI endpoint '{}': endpoint must be an http(s) URL",
                endpoint.name
            ));
        }
        if endpoint.model.is_empty() {
            errors.push(format!("AI endpoint '{}': model is required", endpoint.name));
        }
        if endpoint.rate_limit == 0 {
            errors.push(format!(
                "AI endpoint '{}': rate_limit must be at least 1 call per minute",
                endpoint.name
            ));
        }
    }

    let mut rule_ids = HashSet::new();
    for rule in &config.rules.rules {
        if !rule_ids.insert(rule.id.as_str()) {
            errors.push(format!("duplicate rule id '{}'", rule.id));
        }
        if let Err(e) = Regex::new(&rule.pattern) {
            errors.push(format!("rule '{}': invalid pattern: {}", rule.id, e));
        }
    }

    let s = &config.scheduler;
    if s.min_workers == 0 {
        errors.push("scheduler.min_workers must be at least 1".to_string());
    }
    if s.min_workers > s.max_workers {
        errors.push("scheduler.min_workers must not exceed max_workers".to_string());
    }
    if s.initial_workers < s.min_workers || s.initial_workers > s.max_workers {
        errors.push("scheduler.initial_workers must be within [min_workers, max_workers]".to_string());
    }
    if s.queue_capacity == 0 || s.worker_queue_size == 0 || s.backpressure_threshold == 0 {
        errors.push(
            "scheduler.queue_capacity, worker_queue_size and backpressure_threshold must be at least 1"
                .to_string(),
        );
    }
    if s.scale_down_threshold >= s.scale_up_threshold {
        errors.push("scheduler.scale_down_threshold must be below scale_up_threshold".to_string());
    }
    if s.scale_interval.is_zero() {
        errors.push("scheduler.scale_interval must be greater than zero".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
