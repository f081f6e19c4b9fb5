use serde::{Deserialize, Serialize};

/// What happens to a record that matches a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Drop the record as noise
    Filter,
    /// Report the record as important
    Alert,
    /// Drop the record silently
    Ignore,
    /// Report the record, marked for emphasis
    Highlight,
}

impl RuleAction {
    pub fn should_filter(&self) -> bool {
        matches!(self, RuleAction::Filter | RuleAction::Ignore)
    }
}

/// Rule as written in config files and accepted by add/update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    pub pattern: String,
    pub action: RuleAction,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: String,
}

fn default_enabled() -> bool {
    true
}

impl RuleDefinition {
    pub fn new(id: &str, pattern: &str, action: RuleAction, priority: i32) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            pattern: pattern.to_string(),
            action,
            priority,
            enabled: true,
            category: String::new(),
            color: String::new(),
            description: String::new(),
        }
    }
}

/// Rules installed when the configuration names none
pub fn default_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition {
            id: "builtin-panic".to_string(),
            name: "Panic or fatal error".to_string(),
            pattern: r"(?i)\b(panic|fatal|segmentation fault|out of memory|OutOfMemoryError)\b"
                .to_string(),
            action: RuleAction::Alert,
            priority: 1,
            enabled: true,
            category: "crash".to_string(),
            color: "red".to_string(),
            description: "Process crashes are always reported".to_string(),
        },
        RuleDefinition {
            id: "builtin-debug".to_string(),
            name: "Debug and trace output".to_string(),
            pattern: r"^\S*\s*\S*\s*\[?(DEBUG|TRACE)\]?\s".to_string(),
            action: RuleAction::Filter,
            priority: 50,
            enabled: true,
            category: "noise".to_string(),
            color: String::new(),
            description: "Debug-level lines are never important".to_string(),
        },
        RuleDefinition {
            id: "builtin-health".to_string(),
            name: "Health checks".to_string(),
            pattern: r"(?i)(GET|HEAD) /(health|healthz|ready|readyz|live|livez|ping)\b"
                .to_string(),
            action: RuleAction::Filter,
            priority: 60,
            enabled: true,
            category: "noise".to_string(),
            color: String::new(),
            description: "Load balancer health checks".to_string(),
        },
    ]
}
