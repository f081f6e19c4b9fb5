use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One logical, possibly multi-line, log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub content: String,
    pub source_id: String,
}

impl Record {
    pub fn new(content: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source_id: source_id.into(),
        }
    }

    /// Content hash used as cache key; identical lines from different sources
    /// share the same key.
    pub fn content_key(&self) -> String {
        content_key(&self.content)
    }
}

/// Hex-encoded SHA-256 of the given content
pub fn content_key(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_key_ignores_source() {
        let a = Record::new("disk full", "app");
        let b = Record::new("disk full", "db");
        assert_eq!(a.content_key(), b.content_key());
        assert_eq!(a.content_key().len(), 64);
        assert_ne!(a.content_key(), content_key("disk ok"));
    }
}
