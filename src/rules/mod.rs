pub mod engine;
pub mod types;

pub use engine::{load_rules_file, RuleEngine, RuleError, RuleStats};
pub use types::{default_rules, RuleAction, RuleDefinition};
