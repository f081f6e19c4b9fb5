use crate::format::LogFormat;
use crate::rules::types::RuleDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default format for sources that don't name one
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Log file path (file sources)
    pub path: Option<PathBuf>,
    /// Program to spawn (process sources)
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub format: Option<LogFormat>,
    /// Where to start when no usable cursor exists
    #[serde(default)]
    pub start: ReadStart,
}

impl SourceConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source_type: SourceType::File,
            path: Some(path.into()),
            command: None,
            args: Vec::new(),
            format: None,
            start: ReadStart::End,
        }
    }

    pub fn process(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            source_type: SourceType::Process,
            path: None,
            command: Some(command.into()),
            args,
            format: None,
            start: ReadStart::End,
        }
    }

    pub fn stdin() -> Self {
        Self {
            source_type: SourceType::Stdin,
            path: None,
            command: None,
            args: Vec::new(),
            format: None,
            start: ReadStart::End,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    File,
    Process,
    Stdin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadStart {
    Beginning,
    #[default]
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(with = "duration_format", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// How long a source must stay quiet before a pending multi-line record is flushed
    #[serde(with = "duration_format", default = "default_merge_idle_flush")]
    pub merge_idle_flush: Duration,
    #[serde(default = "default_max_record_lines")]
    pub max_record_lines: usize,
    /// Directory for cursor sidecar files; next to the log file when unset
    pub cursor_dir: Option<PathBuf>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            merge_idle_flush: default_merge_idle_flush(),
            max_record_lines: default_max_record_lines(),
            cursor_dir: None,
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_merge_idle_flush() -> Duration {
    Duration::from_secs(1)
}

fn default_max_record_lines() -> usize {
    crate::merge::DEFAULT_MAX_LINES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
    #[serde(with = "duration_format", default = "default_batch_max_wait")]
    pub max_wait: Duration,
    /// Flushed batches waiting for submission, per source
    #[serde(default = "default_batch_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
            max_wait: default_batch_max_wait(),
            channel_capacity: default_batch_channel_capacity(),
        }
    }
}

fn default_batch_max_size() -> usize {
    10
}

fn default_batch_max_wait() -> Duration {
    Duration::from_secs(3)
}

fn default_batch_channel_capacity() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_items")]
    pub max_items: usize,
    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: usize,
    #[serde(with = "duration_format", default = "default_cleanup_interval")]
    pub cleanup_interval: Duration,
    #[serde(with = "duration_format", default = "default_ai_ttl")]
    pub ai_ttl: Duration,
    #[serde(with = "duration_format", default = "default_rule_ttl")]
    pub rule_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: default_cache_max_items(),
            max_bytes: default_cache_max_bytes(),
            cleanup_interval: default_cleanup_interval(),
            ai_ttl: default_ai_ttl(),
            rule_ttl: default_rule_ttl(),
        }
    }
}

fn default_cache_max_items() -> usize {
    10_000
}

fn default_cache_max_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_ai_ttl() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_rule_ttl() -> Duration {
    Duration::from_secs(3600)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub endpoints: Vec<AiEndpointConfig>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(with = "duration_format", default = "default_ai_timeout")]
    pub timeout: Duration,
    /// Base unit for linear retry backoff (attempt * retry_backoff)
    #[serde(with = "duration_format", default = "default_retry_backoff")]
    pub retry_backoff: Duration,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            max_retries: default_max_retries(),
            timeout: default_ai_timeout(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_ai_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiEndpointConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub token: String,
    pub model: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Calls per minute
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
}

fn default_rate_limit() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// JSON files containing an array of rule definitions
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
    /// Install the built-in rules when no rules are configured
    #[serde(default = "default_true")]
    pub use_defaults: bool,
    #[serde(default = "default_match_cache_size")]
    pub match_cache_size: usize,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            rules: Vec::new(),
            use_defaults: true,
            match_cache_size: default_match_cache_size(),
        }
    }
}

fn default_match_cache_size() -> usize {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_initial_workers")]
    pub initial_workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Jobs a single worker may hold at once
    #[serde(default = "default_worker_queue_size")]
    pub worker_queue_size: usize,
    #[serde(default)]
    pub strategy: BalanceStrategy,
    /// Admitted-but-unfinished jobs at which submissions are rejected
    #[serde(default = "default_backpressure_threshold")]
    pub backpressure_threshold: usize,
    #[serde(with = "duration_format", default = "default_scale_interval")]
    pub scale_interval: Duration,
    #[serde(default = "default_scale_up_threshold")]
    pub scale_up_threshold: f64,
    #[serde(default = "default_scale_down_threshold")]
    pub scale_down_threshold: f64,
    /// Delay before a rejected batch is offered again
    #[serde(with = "duration_format", default = "default_submit_retry")]
    pub submit_retry: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            initial_workers: default_initial_workers(),
            queue_capacity: default_queue_capacity(),
            worker_queue_size: default_worker_queue_size(),
            strategy: BalanceStrategy::default(),
            backpressure_threshold: default_backpressure_threshold(),
            scale_interval: default_scale_interval(),
            scale_up_threshold: default_scale_up_threshold(),
            scale_down_threshold: default_scale_down_threshold(),
            submit_retry: default_submit_retry(),
        }
    }
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    8
}

fn default_initial_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    256
}

fn default_worker_queue_size() -> usize {
    1
}

fn default_backpressure_threshold() -> usize {
    128
}

fn default_scale_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_scale_up_threshold() -> f64 {
    0.8
}

fn default_scale_down_threshold() -> f64 {
    0.2
}

fn default_submit_retry() -> Duration {
    Duration::from_millis(500)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    #[default]
    RoundRobin,
    LeastLoaded,
    Random,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub notifier: NotifierKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Stdout,
    Log,
}

// Custom serde module for duration parsing
pub(crate) mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let (value_str, unit) = if let Some(v) = s.strip_suffix("ms") {
            (v, "ms")
        } else if let Some(v) = s.strip_suffix('s') {
            (v, "s")
        } else if let Some(v) = s.strip_suffix('m') {
            (v, "m")
        } else if let Some(v) = s.strip_suffix('h') {
            (v, "h")
        } else {
            return Err(format!("invalid duration format: {}", s));
        };

        let value: u64 = value_str
            .trim()
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        let duration = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(format!("unknown unit: {}", unit)),
        };

        Ok(duration)
    }

    pub fn format_duration(d: Duration) -> String {
        let secs = d.as_secs();
        if d.subsec_millis() != 0 || secs == 0 {
            format!("{}ms", d.as_millis())
        } else if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }

}
