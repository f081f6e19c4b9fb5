use crate::verdict::{Verdict, REASON_RESULT_MISSING};
use serde::Deserialize;
use tracing::{debug, warn};

/// One classification as the model writes it
#[derive(Debug, Deserialize)]
struct RawVerdict {
    should_filter: bool,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    confidence: Option<f32>,
}

impl From<RawVerdict> for Verdict {
    fn from(raw: RawVerdict) -> Self {
        Verdict::from_ai(
            raw.should_filter,
            raw.summary,
            raw.reason,
            raw.confidence.map(|c| c.clamp(0.0, 1.0)),
        )
    }
}

#[derive(Debug, Deserialize)]
struct RawBatch {
    results: Vec<RawVerdict>,
    #[serde(default)]
    overall_summary: String,
    #[serde(default)]
    important_count: Option<usize>,
}

/// Locate the JSON payload in model output.
///
/// Handles fenced code blocks and JSON surrounded by prose. Every `{` or `[`
/// is tried in order; the first balanced span that parses as an object, or
/// as a non-empty array of objects, wins. Brackets inside string literals
/// do not count toward the balance.
pub fn extract_json(text: &str) -> Option<&str> {
    json_candidates(text).next()
}

fn json_candidates<'a>(text: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    fenced_body(text)
        .into_iter()
        .chain(std::iter::once(text))
        .flat_map(balanced_spans)
        .filter(|span| is_payload(span))
}

fn is_payload(span: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(span) {
        Ok(serde_json::Value::Object(_)) => true,
        Ok(serde_json::Value::Array(items)) => !items.is_empty() && items.iter().all(|v| v.is_object()),
        _ => false,
    }
}

fn balanced_spans<'a>(text: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    text.char_indices()
        .filter(|(_, c)| matches!(c, '{' | '['))
        .filter_map(move |(start, _)| balanced_len(&text[start..]).map(|len| &text[start..start + len]))
}

/// Byte length of the bracketed value opening `text`
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip an optional language tag on the fence line
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let close = body.find("```").unwrap_or(body.len());
    let inner = &body[..close];
    if inner.contains(['{', '[']) {
        Some(inner)
    } else {
        None
    }
}

/// First candidate span `parse` accepts. Reports the first candidate's error otherwise.
fn parse_first<T>(
    content: &str,
    parse: impl Fn(&str) -> Result<T, serde_json::Error>,
) -> Result<T, String> {
    let mut first_error = None;
    for span in json_candidates(content) {
        match parse(span) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }
    Err(first_error.unwrap_or_else(|| "no JSON in response".to_string()))
}

/// Parse a single-record classification; unparseable output yields a filter verdict
pub fn parse_single(content: &str) -> Verdict {
    let parsed = parse_first(content, |json| serde_json::from_str::<RawVerdict>(json));

    match parsed {
        Ok(raw) => raw.into(),
        Err(e) => {
            warn!(error = %e, "Unparseable classifier response, filtering record");
            Verdict::fallback(format!("unparseable classifier response: {}", e))
        }
    }
}

/// Parse a batch classification into exactly `expected` verdicts.
///
/// Missing trailing results are padded with filter verdicts; extra results are dropped.
pub fn parse_batch(content: &str, expected: usize) -> Vec<Verdict> {
    let parsed = parse_first(content, |json| {
        serde_json::from_str::<RawBatch>(json)
            .map(|b| {
                debug!(
                    overall_summary = %b.overall_summary,
                    important_count = ?b.important_count,
                    "Batch classification received"
                );
                b.results
            })
            .or_else(|_| serde_json::from_str::<Vec<RawVerdict>>(json))
    });

    let mut verdicts: Vec<Verdict> = match parsed {
        Ok(results) => results.into_iter().map(Verdict::from).collect(),
        Err(e) => {
            warn!(error = %e, expected, "Unparseable batch response, filtering all records");
            let reason = format!("unparseable classifier response: {}", e);
            return (0..expected).map(|_| Verdict::fallback(reason.clone())).collect();
        }
    };

    if verdicts.len() < expected {
        warn!(
            got = verdicts.len(),
            expected,
            "Classifier returned fewer results than records, padding"
        );
        verdicts.resize_with(expected, || Verdict::fallback(REASON_RESULT_MISSING));
    }
    verdicts.truncate(expected);
    verdicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::VerdictSource;

    #[test]
    fn test_extract_plain_object() {
        assert_eq!(extract_json(r#"{"a":1}"#), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_extract_from_fence() {
        let text = "Here you go:\n```json\n{\"should_filter\": false}\n```\nThanks";
        assert_eq!(extract_json(text), Some("{\"should_filter\": false}"));
    }

    #[test]
    fn test_extract_from_prose() {
        let text = "After analysis, {\"results\": [{\"x\": {\"y\": 1}}]} is my answer.";
        assert_eq!(extract_json(text), Some("{\"results\": [{\"x\": {\"y\": 1}}]}"));
    }

    #[test]
    fn test_extract_array() {
        assert_eq!(
            extract_json(r#"list: [{"a": 1}, {"b": 2}] done"#),
            Some(r#"[{"a": 1}, {"b": 2}]"#)
        );
        assert_eq!(extract_json("list: [1, 2] done"), None);
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_extract_skips_bracket_in_prose() {
        let text = r#"Note [1]: {"results": [{"should_filter": true}]} (see [2])"#;
        assert_eq!(extract_json(text), Some(r#"{"results": [{"should_filter": true}]}"#));
    }

    #[test]
    fn test_extract_ignores_brackets_inside_strings() {
        let text = r#"Result: {"reason": "saw \"}\" and ] in line", "ok": true} trailing }"#;
        assert_eq!(
            extract_json(text),
            Some(r#"{"reason": "saw \"}\" and ] in line", "ok": true}"#)
        );
    }

    #[test]
    fn test_parse_batch_with_bracketed_prose() {
        let content = r#"Note [1]: {"results": [
            {"should_filter": true, "summary": "a", "reason": "noise"},
            {"should_filter": false, "summary": "b", "reason": "db down"}
        ]}"#;
        let verdicts = parse_batch(content, 2);
        assert_eq!(verdicts.len(), 2);
        assert!(verdicts[0].should_filter);
        assert!(!verdicts[1].should_filter);
        assert_eq!(verdicts[1].source, VerdictSource::Ai);
    }

    #[test]
    fn test_parse_single_skips_unrelated_object() {
        let content = r#"Context {"note": "ignore"} then {"should_filter": false, "summary": "s", "reason": "disk full"}"#;
        let v = parse_single(content);
        assert_eq!(v.source, VerdictSource::Ai);
        assert!(!v.should_filter);
        assert_eq!(v.summary, "s");
    }

    #[test]
    fn test_parse_single_applies_conservative_filter() {
        let v = parse_single(r#"{"should_filter": false, "summary": "x", "reason": "无法判断"}"#);
        assert!(v.should_filter);
        assert_eq!(v.source, VerdictSource::Ai);
    }

    #[test]
    fn test_parse_single_garbage_falls_back() {
        let v = parse_single("I cannot help with that");
        assert!(v.should_filter);
        assert_eq!(v.source, VerdictSource::Fallback);
    }

    #[test]
    fn test_parse_batch_pads_missing_results() {
        let content = r#"```json
{"results": [
  {"should_filter": true, "summary": "a", "reason": "noise"},
  {"should_filter": false, "summary": "b", "reason": "db down"},
  {"should_filter": true, "summary": "c", "reason": "noise"}
], "overall_summary": "one issue", "important_count": 1}
```"#;
        let verdicts = parse_batch(content, 5);
        assert_eq!(verdicts.len(), 5);
        assert!(!verdicts[1].should_filter);
        for v in &verdicts[3..] {
            assert!(v.should_filter);
            assert_eq!(v.reason, "result missing");
        }
    }

    #[test]
    fn test_parse_batch_truncates_extra() {
        let content = r#"[{"should_filter": true}, {"should_filter": false}, {"should_filter": true}]"#;
        let verdicts = parse_batch(content, 2);
        assert_eq!(verdicts.len(), 2);
        assert!(!verdicts[1].should_filter);
    }

    #[test]
    fn test_parse_batch_garbage_filters_all() {
        let verdicts = parse_batch("{not json}", 3);
        assert_eq!(verdicts.len(), 3);
        assert!(verdicts.iter().all(|v| v.should_filter && v.source == VerdictSource::Fallback));
    }
}
