use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Log formats understood by the pipeline.
///
/// Each format selects a record-start strategy for the line merger and a
/// classification rubric for the AI prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Java,
    Python,
    Go,
    Rust,
    Nginx,
    Syslog,
    Journald,
    Json,
    #[default]
    Generic,
}

impl LogFormat {
    pub const ALL: [LogFormat; 9] = [
        LogFormat::Java,
        LogFormat::Python,
        LogFormat::Go,
        LogFormat::Rust,
        LogFormat::Nginx,
        LogFormat::Syslog,
        LogFormat::Journald,
        LogFormat::Json,
        LogFormat::Generic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LogFormat::Java => "java",
            LogFormat::Python => "python",
            LogFormat::Go => "go",
            LogFormat::Rust => "rust",
            LogFormat::Nginx => "nginx",
            LogFormat::Syslog => "syslog",
            LogFormat::Journald => "journald",
            LogFormat::Json => "json",
            LogFormat::Generic => "generic",
        }
    }

    /// Default record-start strategy for this format
    pub fn record_start(&self) -> RecordStart {
        match self {
            LogFormat::Java => RecordStart::JavaStack,
            LogFormat::Python => RecordStart::PythonTraceback,
            LogFormat::Json => RecordStart::JsonObject,
            LogFormat::Nginx | LogFormat::Syslog | LogFormat::Journald => RecordStart::EveryLine,
            LogFormat::Go | LogFormat::Rust | LogFormat::Generic => RecordStart::TimestampOrLevel,
        }
    }

    /// Format-specific part of the classifier system prompt
    pub fn rubric(&self) -> &'static str {
        match self {
            LogFormat::Java => {
                "Java application logs. Exceptions with stack traces, OutOfMemoryError, \
                 failed transactions and connection pool exhaustion are important. \
                 Routine INFO/DEBUG lines, health checks and framework startup banners can be filtered."
            }
            LogFormat::Python => {
                "Python application logs. Tracebacks, unhandled exceptions and CRITICAL/ERROR \
                 entries are important. Routine INFO/DEBUG output and access-style lines can be filtered."
            }
            LogFormat::Go => {
                "Go service logs. panic, fatal, goroutine dumps, data races and persistent \
                 connection errors are important. Routine request logs and debug output can be filtered."
            }
            LogFormat::Rust => {
                "Rust service logs. Panics, thread crashes and ERROR entries are important. \
                 TRACE/DEBUG/INFO noise can be filtered."
            }
            LogFormat::Nginx => {
                "Nginx access and error logs. 5xx responses, upstream timeouts, connection \
                 refusals and repeated 4xx from one client are important. Successful 2xx/3xx \
                 requests and static asset fetches can be filtered."
            }
            LogFormat::Syslog => {
                "Syslog messages. Kernel errors, OOM killer, disk and filesystem failures, \
                 authentication failures and service crashes are important. Routine cron and \
                 session open/close messages can be filtered."
            }
            LogFormat::Journald => {
                "systemd journal entries. Unit failures, restarts in a loop, kernel errors and \
                 authentication failures are important. Routine unit start/stop messages can be filtered."
            }
            LogFormat::Json => {
                "Structured JSON logs. Entries whose level is error/fatal or that carry an \
                 exception/stack field are important. info/debug entries can be filtered."
            }
            LogFormat::Generic => {
                "Generic application logs. Errors, crashes, security events and data loss \
                 are important. Routine informational output can be filtered."
            }
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        LogFormat::ALL
            .iter()
            .find(|f| f.name() == lower)
            .copied()
            .ok_or_else(|| {
                let valid: Vec<&str> = LogFormat::ALL.iter().map(|f| f.name()).collect();
                format!("unknown log format '{}', expected one of: {}", s, valid.join(", "))
            })
    }
}

/// Strategy deciding whether a line begins a new logical record.
///
/// New formats are added by adding a variant and its predicate here; the
/// merger itself never branches on format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStart {
    /// Timestamp-like or level-like leading token starts a record
    TimestampOrLevel,
    /// Like `TimestampOrLevel`, but `at ...`, `Caused by:` and `... N more`
    /// frames always continue the current record
    JavaStack,
    /// Like `TimestampOrLevel`, but traceback headers, indented frames and the
    /// final `SomeError: message` line continue the current record
    PythonTraceback,
    /// A line opening a JSON object starts a record
    JsonObject,
    /// Every line is its own record
    EveryLine,
}

impl RecordStart {
    pub fn is_new_record_start(&self, line: &str) -> bool {
        match self {
            RecordStart::EveryLine => true,
            RecordStart::TimestampOrLevel => !is_indented(line) && starts_with_marker(line),
            RecordStart::JavaStack => {
                let trimmed = line.trim_start();
                if is_indented(line)
                    || trimmed.starts_with("at ")
                    || trimmed.starts_with("Caused by:")
                    || trimmed.starts_with("Suppressed:")
                    || (trimmed.starts_with("...") && trimmed.ends_with("more"))
                {
                    return false;
                }
                starts_with_marker(line)
            }
            RecordStart::PythonTraceback => {
                if is_indented(line) || line.starts_with("Traceback ") {
                    return false;
                }
                if python_exception_line().is_match(line) {
                    return false;
                }
                starts_with_marker(line)
            }
            RecordStart::JsonObject => line.trim_start().starts_with('{'),
        }
    }
}

fn is_indented(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('\t')
}

fn starts_with_marker(line: &str) -> bool {
    timestamp_prefix().is_match(line) || level_prefix().is_match(line)
}

fn timestamp_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^\[?(",
            r"\d{4}[-/]\d{2}[-/]\d{2}[T ]\d{2}:\d{2}:\d{2}",
            r"|\d{2}[-/]\w{3}[-/]\d{4}:\d{2}:\d{2}:\d{2}",
            r"|[A-Z][a-z]{2}\s+\d{1,2} \d{2}:\d{2}:\d{2}",
            r"|\d{2}:\d{2}:\d{2}",
            r"|\d{10}(\.\d+)?\b",
            r")"
        ))
        .expect("timestamp prefix regex is valid")
    })
}

fn level_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[?(TRACE|DEBUG|INFO|NOTICE|WARN|WARNING|ERROR|ERR|SEVERE|FATAL|CRITICAL|PANIC)\b")
            .expect("level prefix regex is valid")
    })
}

fn python_exception_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][\w.]*(Error|Exception|Interrupt|Exit)(: .*)?$")
            .expect("python exception regex is valid")
    })
}
