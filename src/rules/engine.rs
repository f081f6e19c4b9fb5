use super::types::{default_rules, RuleDefinition};
use crate::config::types::RulesConfig;
use crate::record::content_key;
use crate::verdict::Verdict;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule '{0}' already exists")]
    DuplicateId(String),

    #[error("rule '{0}' not found")]
    NotFound(String),

    #[error("rule '{id}' has invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        id: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read rules file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rules file '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A rule together with its compiled pattern. `regex` is `None` when the
/// pattern failed to compile; such rules never match.
#[derive(Debug)]
struct CompiledRule {
    def: RuleDefinition,
    regex: Option<Regex>,
}

impl CompiledRule {
    fn compile(def: RuleDefinition) -> Self {
        let regex = match Regex::new(&def.pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(rule_id = %def.id, error = %e, "Skipping rule with invalid pattern");
                None
            }
        };
        Self { def, regex }
    }

    fn try_compile(def: RuleDefinition) -> Result<Self, RuleError> {
        let regex = Regex::new(&def.pattern).map_err(|e| RuleError::InvalidPattern {
            id: def.id.clone(),
            pattern: def.pattern.clone(),
            source: e,
        })?;
        Ok(Self {
            def,
            regex: Some(regex),
        })
    }

    fn is_active(&self) -> bool {
        self.def.enabled && self.regex.is_some()
    }

    fn matches(&self, content: &str) -> bool {
        self.is_active() && self.regex.as_ref().is_some_and(|re| re.is_match(content))
    }

    fn verdict(&self) -> Verdict {
        let summary = if self.def.description.is_empty() {
            self.def.name.clone()
        } else {
            format!("{}: {}", self.def.name, self.def.description)
        };
        Verdict::from_rule(
            self.def.action.should_filter(),
            summary,
            format!("matched rule '{}'", self.def.id),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleStats {
    pub total: usize,
    pub enabled: usize,
    pub invalid: usize,
    pub cache_hits: u64,
    pub cache_entries: usize,
}

/// Ordered regex pre-filter.
///
/// Rules are evaluated in ascending priority; the first enabled match decides.
/// Results are memoized by content hash so repeated lines skip evaluation.
pub struct RuleEngine {
    rules: RwLock<Vec<CompiledRule>>,
    /// content hash -> id of the matching rule, or None for "no rule matched"
    match_cache: RwLock<HashMap<String, Option<String>>>,
    match_cache_size: usize,
    cache_hits: AtomicU64,
}

impl RuleEngine {
    pub fn new(definitions: Vec<RuleDefinition>, match_cache_size: usize) -> Self {
        let mut rules: Vec<CompiledRule> = definitions.into_iter().map(CompiledRule::compile).collect();
        sort_rules(&mut rules);

        Self {
            rules: RwLock::new(rules),
            match_cache: RwLock::new(HashMap::new()),
            match_cache_size: match_cache_size.max(1),
            cache_hits: AtomicU64::new(0),
        }
    }

    /// Build from config: inline rules, then rule files, then built-in
    /// defaults if nothing was configured. Unreadable files are logged and skipped.
    pub fn from_config(config: &RulesConfig) -> Self {
        let mut definitions = config.rules.clone();
        for path in &config.files {
            match load_rules_file(path) {
                Ok(mut defs) => {
                    info!(path = %path.display(), count = defs.len(), "Loaded rules file");
                    definitions.append(&mut defs);
                }
                Err(e) => warn!(error = %e, "Ignoring rules file"),
            }
        }

        if definitions.is_empty() && config.use_defaults {
            definitions = default_rules();
        }

        // First definition wins on id collision
        let mut seen = std::collections::HashSet::new();
        definitions.retain(|d| {
            let fresh = seen.insert(d.id.clone());
            if !fresh {
                warn!(rule_id = %d.id, "Dropping duplicate rule id");
            }
            fresh
        });

        Self::new(definitions, config.match_cache_size)
    }

    /// Verdict of the first matching rule, or `None` to defer to the classifier
    ///
    /// Lock order is rules, then match cache. The rules read lock is held
    /// until the result is memoized, so a concurrent rule change cannot
    /// clear the cache between evaluation and insertion.
    pub fn filter(&self, content: &str) -> Option<Verdict> {
        let key = content_key(content);
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());

        let cached = self
            .match_cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned();

        if let Some(cached) = cached {
            match cached {
                None => {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(id) => {
                    // The rule may have been removed since; fall through to evaluation
                    if let Some(rule) = rules.iter().find(|r| r.def.id == id && r.is_active()) {
                        self.cache_hits.fetch_add(1, Ordering::Relaxed);
                        return Some(rule.verdict());
                    }
                }
            }
        }

        let matched = rules.iter().find(|r| r.matches(content));
        let verdict = matched.map(|r| r.verdict());
        let matched_id = matched.map(|r| r.def.id.clone());

        if let Some(id) = &matched_id {
            debug!(rule_id = %id, "Rule matched");
        }
        self.remember(key, matched_id);
        drop(rules);
        verdict
    }

    /// Definition of the rule that would decide `content`, bypassing the cache
    pub fn matching_rule(&self, content: &str) -> Option<RuleDefinition> {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        rules.iter().find(|r| r.matches(content)).map(|r| r.def.clone())
    }

    pub fn add_rule(&self, def: RuleDefinition) -> Result<(), RuleError> {
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        if rules.iter().any(|r| r.def.id == def.id) {
            return Err(RuleError::DuplicateId(def.id));
        }
        rules.push(CompiledRule::try_compile(def)?);
        sort_rules(&mut rules);
        self.invalidate();
        Ok(())
    }

    /// Replace the rule with the same id
    pub fn update_rule(&self, def: RuleDefinition) -> Result<(), RuleError> {
        let compiled = CompiledRule::try_compile(def)?;
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        let slot = rules
            .iter_mut()
            .find(|r| r.def.id == compiled.def.id)
            .ok_or_else(|| RuleError::NotFound(compiled.def.id.clone()))?;
        *slot = compiled;
        sort_rules(&mut rules);
        self.invalidate();
        Ok(())
    }

    pub fn remove_rule(&self, id: &str) -> Result<RuleDefinition, RuleError> {
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        let index = rules
            .iter()
            .position(|r| r.def.id == id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;
        let removed = rules.remove(index);
        self.invalidate();
        Ok(removed.def)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), RuleError> {
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        let rule = rules
            .iter_mut()
            .find(|r| r.def.id == id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;
        rule.def.enabled = enabled;
        self.invalidate();
        Ok(())
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> Vec<RuleDefinition> {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        rules.iter().map(|r| r.def.clone()).collect()
    }

    pub fn stats(&self) -> RuleStats {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        RuleStats {
            total: rules.len(),
            enabled: rules.iter().filter(|r| r.is_active()).count(),
            invalid: rules.iter().filter(|r| r.regex.is_none()).count(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_entries: self.match_cache.read().unwrap_or_else(|e| e.into_inner()).len(),
        }
    }

    fn remember(&self, key: String, matched: Option<String>) {
        let mut cache = self.match_cache.write().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= self.match_cache_size {
            cache.clear();
        }
        cache.insert(key, matched);
    }

    /// Called with the rules write lock held
    fn invalidate(&self) {
        self.match_cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

fn sort_rules(rules: &mut [CompiledRule]) {
    // Stable: equal priorities keep insertion order
    rules.sort_by_key(|r| r.def.priority);
}

/// Read a JSON array of rule definitions
pub fn load_rules_file(path: &Path) -> Result<Vec<RuleDefinition>, RuleError> {
    let text = std::fs::read_to_string(path).map_err(|e| RuleError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| RuleError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}
