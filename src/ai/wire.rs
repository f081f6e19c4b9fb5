use crate::format::LogFormat;
use crate::record::Record;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    pub content: String,
}

/// Chat-completion request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

impl ChatResponse {
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

const SINGLE_REPLY_FORMAT: &str = r#"Reply with JSON only:
{"should_filter": true|false, "summary": "<short summary>", "reason": "<why>", "confidence": 0.0-1.0}"#;

const BATCH_REPLY_FORMAT: &str = r#"Classify every numbered entry, in order. Reply with JSON only:
{"results": [{"should_filter": true|false, "summary": "<short summary>", "reason": "<why>", "confidence": 0.0-1.0}, ...],
 "overall_summary": "<one sentence>", "important_count": <number of entries with should_filter=false>}"#;

fn system_prompt(format: LogFormat, batch: bool) -> String {
    format!(
        "You are a log triage assistant. Decide for each log entry whether it is important \
         enough to alert an operator (should_filter=false) or routine noise (should_filter=true). \
         When you cannot decide, say so in the reason; such entries are treated as noise.\n\n\
         Log format: {}\n{}\n\n{}",
        format,
        format.rubric(),
        if batch {
            BATCH_REPLY_FORMAT
        } else {
            SINGLE_REPLY_FORMAT
        }
    )
}

/// Build the request: system rubric first, then either the single record or a
/// numbered list of records.
pub fn build_request(model: &str, format: LogFormat, records: &[Record]) -> ChatRequest {
    let batch = records.len() > 1;
    let user_content = if batch {
        records
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {}", i + 1, r.content))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        records
            .first()
            .map(|r| r.content.clone())
            .unwrap_or_default()
    };

    ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: system_prompt(format, batch),
            },
            ChatMessage {
                role: "user".to_string(),
                content: user_content,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_record_request() {
        let req = build_request("m", LogFormat::Nginx, &[Record::new("GET / 500", "web")]);
        assert_eq!(req.model, "m");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, "system");
        assert!(req.messages[0].content.contains("nginx"));
        assert!(req.messages[0].content.contains("\"should_filter\""));
        assert_eq!(req.messages[1].content, "GET / 500");
    }

    #[test]
    fn test_batch_request_numbers_records() {
        let records = vec![Record::new("a", "s"), Record::new("b\n  c", "s")];
        let req = build_request("m", LogFormat::Java, &records);
        assert_eq!(req.messages[1].content, "1. a\n2. b\n  c");
        assert!(req.messages[0].content.contains("\"results\""));
    }

    #[test]
    fn test_response_content() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"should_filter\":true}"}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.first_content(), Some("{\"should_filter\":true}"));
    }
}
