use crate::config::parse::load_config;
use crate::config::types::Config;
use crate::rules::RuleEngine;
use std::path::PathBuf;

/// Show which rule, if any, decides `line`
pub fn check(config_path: Option<PathBuf>, line: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config_path {
        Some(path) => load_config(&path)?,
        None => Config::default(),
    };
    let engine = RuleEngine::from_config(&config.rules);
    let stats = engine.stats();
    println!(
        "{} rule(s) loaded, {} enabled, {} invalid",
        stats.total, stats.enabled, stats.invalid
    );

    match engine.matching_rule(line) {
        Some(rule) => {
            let verdict = engine.filter(line);
            println!("Matched rule '{}' ({})", rule.id, rule.name);
            println!("  action:   {:?}", rule.action);
            println!("  priority: {}", rule.priority);
            if let Some(verdict) = verdict {
                println!("  filtered: {}", verdict.should_filter);
            }
        }
        None => println!("No rule matched; the line would go to the AI classifier"),
    }
    Ok(())
}
