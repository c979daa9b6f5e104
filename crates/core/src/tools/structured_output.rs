//! # Structured Output Parser
//!
//! Recovers a JSON value from free-text model output.
//!
//! ## Strategy
//!
//! 1. Strict parse of the whole (trimmed) response.
//! 2. Try candidate regions in order: `json`-labelled fenced blocks, then
//!    other fenced blocks that contain a bracket, then the whole response.
//!    A missing closing fence is tolerated (truncated responses).
//! 3. Within a candidate, scan from the first `{` (the first `[` only when
//!    there is no `{`) with a depth-counting scanner that skips string
//!    literals and escapes, and strict-parse the balanced span.
//! 4. On failure, append the closers for every bracket still open (closing
//!    an unterminated string first) and retry once.
//!
//! The first candidate that yields a value wins; otherwise the reason
//! reported is the one from the most preferred candidate.
//!
//! Parsing never panics and never returns `Err` from [`parse`]; failures are
//! a [`ParseOutcome::Failed`] that carries the raw text.

use crate::error::ParseFailure;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::OnceLock;

/// Upper bound on synthesized closing tokens during repair.
///
/// Responses truncated deeper than this are treated as unrecoverable.
pub const MAX_REPAIR_CLOSERS: usize = 8;

/// Length of the raw-text excerpt carried into audit messages.
pub const RAW_PREVIEW_CHARS: usize = 1000;

/// Result of parsing a raw response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// A value was recovered
    Parsed(Value),
    /// Nothing usable was found; `raw` is the untouched input
    Failed { raw: String, reason: String },
}

impl ParseOutcome {
    pub fn parse_failed(&self) -> bool {
        matches!(self, ParseOutcome::Failed { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            ParseOutcome::Parsed(value) => Some(value),
            ParseOutcome::Failed { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<Value, ParseFailure> {
        match self {
            ParseOutcome::Parsed(value) => Ok(value),
            ParseOutcome::Failed { raw, reason } => Err(ParseFailure { reason, raw }),
        }
    }
}

/// Parse a raw response into a JSON value.
pub fn parse(raw: &str) -> ParseOutcome {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return failed(raw, "empty response");
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return ParseOutcome::Parsed(value);
    }

    let mut first_failure = None;
    for candidate in candidates(trimmed) {
        match extract(candidate) {
            Ok(value) => return ParseOutcome::Parsed(value),
            Err(reason) => {
                first_failure.get_or_insert(reason);
            }
        }
    }
    failed(
        raw,
        first_failure.unwrap_or_else(|| "no JSON object or array found".to_string()),
    )
}

/// Recover a value from one candidate region.
fn extract(candidate: &str) -> Result<Value, String> {
    let Some(start) = candidate.find('{').or_else(|| candidate.find('[')) else {
        return Err("no JSON object or array found".to_string());
    };

    let extent = scan(candidate, start);
    let span = &candidate[start..extent.end];

    let strict_error = match serde_json::from_str::<Value>(span) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if extent.unclosed.is_empty() && !extent.open_string {
        return Err(format!("invalid JSON: {}", strict_error));
    }

    if extent.unclosed.len() > MAX_REPAIR_CLOSERS {
        return Err(format!(
            "truncated too deeply to repair ({} unclosed brackets)",
            extent.unclosed.len()
        ));
    }

    let repaired = repair(span, &extent);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => {
            tracing::debug!(
                closers = extent.unclosed.len(),
                "Repaired truncated structured output"
            );
            Ok(value)
        }
        Err(e) => Err(format!("invalid JSON after repair: {}", e)),
    }
}

/// Parse a raw response and deserialize it into `T`.
///
/// Shape mismatches are reported as a [`ParseFailure`] too, so callers see a
/// single failure type at the parser boundary.
pub fn parse_as<T: DeserializeOwned>(raw: &str) -> Result<T, ParseFailure> {
    let value = parse(raw).into_result()?;
    serde_json::from_value(value).map_err(|e| ParseFailure {
        reason: format!("unexpected shape: {}", e),
        raw: raw.to_string(),
    })
}

/// First `max_chars` characters of `raw`, for audit payloads.
pub fn preview(raw: &str, max_chars: usize) -> String {
    match raw.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &raw[..idx]),
        None => raw.to_string(),
    }
}

fn failed(raw: &str, reason: impl Into<String>) -> ParseOutcome {
    ParseOutcome::Failed {
        raw: raw.to_string(),
        reason: reason.into(),
    }
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| {
            Regex::new(r"(?s)```([A-Za-z0-9_-]*)[ \t]*\r?\n?(.*?)(?:```|\z)").ok()
        })
        .as_ref()
}

/// Candidate regions, most preferred first.
fn candidates(text: &str) -> Vec<&str> {
    let mut labelled = Vec::new();
    let mut other = Vec::new();
    if let Some(fence) = fence_regex() {
        for caps in fence.captures_iter(text) {
            let label = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let Some(body) = caps.get(2).map(|m| m.as_str()) else {
                continue;
            };
            if label.eq_ignore_ascii_case("json") {
                labelled.push(body);
            } else if body.contains(['{', '[']) {
                other.push(body);
            }
        }
    }
    labelled.extend(other);
    labelled.push(text);
    labelled
}

/// Extent of a bracketed region found by [`scan`].
#[derive(Debug)]
struct Extent {
    /// Exclusive end offset of the span to parse
    end: usize,
    /// Openers still unmatched at `end`, outermost first
    unclosed: Vec<u8>,
    /// The span ends inside a string literal
    open_string: bool,
}

/// Depth-counting scan from `start`, which must point at `{` or `[`.
///
/// Stops right after the bracket that balances the opener, right before a
/// mismatched closer, or at end of text.
fn scan(text: &str, start: usize) -> Extent {
    let bytes = text.as_bytes();
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(b),
            b'}' | b']' => {
                let opener = if b == b'}' { b'{' } else { b'[' };
                if stack.last() != Some(&opener) {
                    return Extent {
                        end: i,
                        unclosed: stack,
                        open_string: false,
                    };
                }
                stack.pop();
                if stack.is_empty() {
                    return Extent {
                        end: i + 1,
                        unclosed: stack,
                        open_string: false,
                    };
                }
            }
            _ => {}
        }
    }

    Extent {
        end: bytes.len(),
        unclosed: stack,
        open_string: in_string,
    }
}

fn repair(span: &str, extent: &Extent) -> String {
    let mut fixed = span.to_string();
    if extent.open_string {
        if fixed.ends_with('\\') {
            fixed.pop();
        }
        fixed.push('"');
    }

    let kept = fixed.trim_end().trim_end_matches(',').len();
    fixed.truncate(kept);

    for opener in extent.unclosed.iter().rev() {
        fixed.push(if *opener == b'{' { '}' } else { ']' });
    }
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn sample_document() -> Value {
        json!({
            "title": "Rate limiter",
            "tags": ["rust", "async", "{braces in strings}"],
            "nested": {"depth": {"level": 3, "items": [1, 2, {"k": "v"}]}},
            "quote": "she said \"hi\" \\ then left",
            "empty": {},
            "flag": true,
            "none": null,
            "score": 87.5
        })
    }

    #[test]
    fn test_round_trip_documents() {
        let docs = vec![
            sample_document(),
            json!([]),
            json!([{"a": 1}, {"b": [true, false]}]),
            json!("plain string"),
            json!(42),
            json!({"unicode": "héllo — 世界 ✓"}),
        ];
        for doc in docs {
            let compact = serde_json::to_string(&doc).unwrap();
            assert_eq!(parse(&compact), ParseOutcome::Parsed(doc.clone()));
            let pretty = serde_json::to_string_pretty(&doc).unwrap();
            assert_eq!(parse(&pretty), ParseOutcome::Parsed(doc));
        }
    }

    #[test]
    fn test_fenced_block_preferred() {
        let raw = "Here you go {not json}\n```json\n{\"a\": 1}\n```\nThanks!";
        assert_eq!(parse(raw), ParseOutcome::Parsed(json!({"a": 1})));
    }

    #[test]
    fn test_json_fence_wins_over_code_fence() {
        let raw = "Starter:\n```rust\nfn main() { run(); }\n```\nResult:\n```json\n{\"title\": \"Ledger\"}\n```";
        assert_eq!(parse(raw), ParseOutcome::Parsed(json!({"title": "Ledger"})));
    }

    #[test]
    fn test_unparseable_fence_falls_through() {
        let raw = "```rust\nfn main() { run(); }\n```\n```\n{\"ok\": true}\n```";
        assert_eq!(parse(raw), ParseOutcome::Parsed(json!({"ok": true})));
    }

    #[test]
    fn test_object_preferred_over_earlier_bracket() {
        let raw = "Based on the repository [1], here is the analysis: {\"confidence\": 0.8, \"findings\": {}}";
        assert_eq!(
            parse(raw),
            ParseOutcome::Parsed(json!({"confidence": 0.8, "findings": {}}))
        );
        assert_eq!(parse("Result: [1, 2] done"), ParseOutcome::Parsed(json!([1, 2])));
    }

    #[test]
    fn test_unlabelled_and_unterminated_fence() {
        let raw = "```\n{\"a\": [1, 2]}\n```";
        assert_eq!(parse(raw), ParseOutcome::Parsed(json!({"a": [1, 2]})));

        let raw = "```json\n{\"a\": {\"b\": 2}";
        assert_eq!(parse(raw), ParseOutcome::Parsed(json!({"a": {"b": 2}})));
    }

    #[test]
    fn test_prose_around_object() {
        let raw = "Sure! The analysis is {\"ok\": true, \"note\": \"use } carefully\"} as requested.";
        assert_eq!(
            parse(raw),
            ParseOutcome::Parsed(json!({"ok": true, "note": "use } carefully"}))
        );
    }

    #[test]
    fn test_escaped_quotes_do_not_break_scanner() {
        let raw = r#"prefix {"s": "a \"quoted\" {brace", "n": 1} suffix"#;
        assert_eq!(
            parse(raw),
            ParseOutcome::Parsed(json!({"s": "a \"quoted\" {brace", "n": 1}))
        );
    }

    #[test]
    fn test_repairs_up_to_three_missing_closers() {
        let doc = json!({"a": {"b": {"c": [1, 2, 3]}}});
        let full = serde_json::to_string(&doc).unwrap();
        for missing in 1..=3 {
            let truncated = &full[..full.len() - missing];
            assert_eq!(
                parse(truncated),
                ParseOutcome::Parsed(doc.clone()),
                "missing {} closers",
                missing
            );
        }
    }

    #[test]
    fn test_repairs_open_string_and_trailing_comma() {
        assert_eq!(
            parse(r#"{"title": "Cache", "tags": ["a", "b","#),
            ParseOutcome::Parsed(json!({"title": "Cache", "tags": ["a", "b"]}))
        );
        assert_eq!(
            parse(r#"{"title": "Cach"#),
            ParseOutcome::Parsed(json!({"title": "Cach"}))
        );
    }

    #[test]
    fn test_mismatched_closer_repaired() {
        assert_eq!(
            parse(r#"{"a": [1, 2}"#),
            ParseOutcome::Parsed(json!({"a": [1, 2]}))
        );
    }

    #[test]
    fn test_deep_truncation_fails_without_panic() {
        let mut deep = String::new();
        for _ in 0..12 {
            deep.push_str("{\"k\": ");
        }
        deep.push('1');
        let outcome = parse(&deep);
        assert!(outcome.parse_failed());
        match outcome {
            ParseOutcome::Failed { raw, .. } => assert_eq!(raw, deep),
            ParseOutcome::Parsed(_) => unreachable!(),
        }
    }

    #[test]
    fn test_missing_ten_closers_is_flagged() {
        let mut doc = json!(1);
        for i in 0..10 {
            doc = json!({ format!("k{}", i): doc });
        }
        let full = serde_json::to_string(&doc).unwrap();
        let truncated = &full[..full.len() - 10];
        assert!(parse(truncated).parse_failed());
    }

    #[test]
    fn test_garbage_and_empty() {
        assert!(parse("").parse_failed());
        assert!(parse("   \n").parse_failed());
        assert!(parse("I could not analyze this repository.").parse_failed());
        assert!(parse("{\"a\": 1,, }").parse_failed());
    }

    #[test]
    fn test_parse_as_shape_mismatch() {
        #[derive(Debug, Deserialize)]
        struct Scored {
            #[allow(dead_code)]
            score: f64,
        }
        assert!(parse_as::<Scored>("{\"score\": 91}").is_ok());
        let err = parse_as::<Scored>("{\"points\": 91}").unwrap_err();
        assert!(err.reason.starts_with("unexpected shape"));
        assert_eq!(err.raw, "{\"points\": 91}");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo", 2), "hé…");
        assert_eq!(preview("short", 10), "short");
    }
}
