use serde::{Deserialize, Serialize};

/// Phrases in a summary or reason that mark a classification as uncertain.
pub const UNCERTAINTY_MARKERS: &[&str] = &[
    "无法判断",
    "不确定",
    "uncertain",
    "unable to determine",
    "cannot determine",
    "can't determine",
];

pub const REASON_RESULT_MISSING: &str = "result missing";

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictSource {
    Rule,
    Ai,
    /// Substituted locally after a classifier or parse failure
    Fallback,
}

/// Filter/keep decision plus explanation for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub should_filter: bool,
    pub summary: String,
    pub reason: String,
    pub confidence: Option<f32>,
    pub source: VerdictSource,
}

impl Verdict {
    pub fn from_rule(should_filter: bool, summary: String, reason: String) -> Self {
        Self {
            should_filter,
            summary,
            reason,
            confidence: None,
            source: VerdictSource::Rule,
        }
        .conservative()
    }

    pub fn from_ai(
        should_filter: bool,
        summary: String,
        reason: String,
        confidence: Option<f32>,
    ) -> Self {
        Self {
            should_filter,
            summary,
            reason,
            confidence,
            source: VerdictSource::Ai,
        }
        .conservative()
    }

    /// Filter verdict used whenever a real classification is unavailable
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            should_filter: true,
            summary: String::new(),
            reason: reason.into(),
            confidence: None,
            source: VerdictSource::Fallback,
        }
    }

    /// Forces `should_filter` when the explanation expresses uncertainty
    pub fn conservative(mut self) -> Self {
        if is_uncertain(&self.summary) || is_uncertain(&self.reason) {
            self.should_filter = true;
        }
        self
    }

    /// Approximate in-memory size, used for the cache byte budget
    pub fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.summary.len() + self.reason.len()
    }
}

pub fn is_uncertain(text: &str) -> bool {
    let lower = text.to_lowercase();
    UNCERTAINTY_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncertain_reason_forces_filter() {
        let v = Verdict::from_ai(false, "数据库连接".into(), "无法判断是否异常".into(), Some(0.4));
        assert!(v.should_filter);
    }

    #[test]
    fn test_english_marker_case_insensitive() {
        let v = Verdict::from_ai(false, "Uncertain outcome".into(), "".into(), None);
        assert!(v.should_filter);
    }

    #[test]
    fn test_certain_verdict_untouched() {
        let v = Verdict::from_ai(false, "OOM killer fired".into(), "process killed".into(), Some(0.9));
        assert!(!v.should_filter);
        assert_eq!(v.source, VerdictSource::Ai);
    }

    #[test]
    fn test_fallback_filters() {
        let v = Verdict::fallback(REASON_RESULT_MISSING);
        assert!(v.should_filter);
        assert_eq!(v.reason, "result missing");
        assert_eq!(v.source, VerdictSource::Fallback);
    }
}
