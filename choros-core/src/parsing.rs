//! Worker response parsing with fallback extraction
//!
//! Workers are supposed to answer with a structured [`WireResponse`], but a
//! degraded worker may wrap the JSON in prose or code fences, or answer in
//! plain text. Parsing tries progressively looser strategies before giving
//! up: direct parse, fence stripping, embedded-object extraction, and finally
//! a scan for a known entity name inside free text.

use regex::Regex;
use std::sync::LazyLock;

use crate::protocol::{PickDecision, PickReaction, ReplyKind, WireResponse, WorkerReply};

/// Parse a raw response body into a [`WireResponse`].
pub fn parse_response(raw: &str) -> Option<WireResponse> {
    let input = raw.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(response) = serde_json::from_str::<WireResponse>(input) {
        return Some(response);
    }

    let unfenced = strip_code_fences(input);
    if let Ok(response) = serde_json::from_str::<WireResponse>(unfenced.trim()) {
        return Some(response);
    }

    if let Some(embedded) = extract_object(&unfenced) {
        if let Ok(response) = serde_json::from_str::<WireResponse>(&embedded) {
            return Some(response);
        }
        let repaired = strip_trailing_commas(&embedded);
        if let Ok(response) = serde_json::from_str::<WireResponse>(&repaired) {
            return Some(response);
        }
    }

    None
}

/// Scan free text for the first known entity name, case-insensitively.
pub fn extract_known_entity(raw: &str, known: &[String]) -> Option<String> {
    for name in known {
        let pattern = format!(r"(?i)\b{}\b", regex::escape(name));
        if let Ok(re) = Regex::new(&pattern) {
            if re.is_match(raw) {
                return Some(name.clone());
            }
        }
    }
    None
}

/// A reply plus the continuity token that arrived with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    /// The typed reply
    pub reply: WorkerReply,
    /// Token to present on the next request, when the worker sent one
    pub continuity_token: Option<String>,
}

/// Parse a raw response body into the reply the caller expects.
///
/// A structured response of the wrong kind is semantically invalid and yields
/// `None` (retrying will not fix it). Unstructured text is salvaged through
/// the known-entity fallback before being treated as unparseable; a salvaged
/// reply carries no token.
pub fn parse_reply(raw: &str, expected: ReplyKind, known: &[String]) -> Option<ParsedReply> {
    if let Some(response) = parse_response(raw) {
        let continuity_token = response.continuity_token.clone();
        let reply = response.into_reply()?;
        if reply.kind() != expected {
            return None;
        }
        return Some(ParsedReply {
            reply,
            continuity_token,
        });
    }

    let entity = extract_known_entity(raw, known)?;
    let text = raw.trim().to_string();
    let reply = match expected {
        ReplyKind::Decision => WorkerReply::Decision(PickDecision {
            player: entity,
            rationale: text,
            banter: None,
        }),
        ReplyKind::Reaction => WorkerReply::Reaction(PickReaction {
            engaged: true,
            remark: Some(text),
        }),
    };
    Some(ParsedReply {
        reply,
        continuity_token: None,
    })
}

/// Extract content from markdown code fences
fn strip_code_fences(input: &str) -> String {
    static CODE_FENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"```(?:json|JSON)?\s*\n?([\s\S]*?)\n?```").unwrap());

    if let Some(caps) = CODE_FENCE_RE.captures(input) {
        if let Some(content) = caps.get(1) {
            return content.as_str().to_string();
        }
    }
    input.to_string()
}

/// Extract the first balanced JSON object from surrounding text
fn extract_object(input: &str) -> Option<String> {
    let start = input.find('{')?;
    let substring = &input[start..];

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in substring.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(substring[..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove trailing commas before closing braces/brackets
fn strip_trailing_commas(input: &str) -> String {
    static TRAILING_COMMA_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());
    TRAILING_COMMA_RE.replace_all(input, "$1").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Vec<String> {
        vec!["A. Vance".to_string(), "R. Okafor".to_string()]
    }

    #[test]
    fn test_parse_direct_json() {
        let raw = r#"{"kind": "decision", "player": "A. Vance", "rationale": "best available", "continuity_token": "t1"}"#;
        let response = parse_response(raw).unwrap();
        assert_eq!(response.player.as_deref(), Some("A. Vance"));
        assert_eq!(response.continuity_token.as_deref(), Some("t1"));
    }

    #[test]
    fn test_parse_code_fenced_json() {
        let raw = "Here you go:\n```json\n{\"kind\": \"decision\", \"player\": \"A. Vance\", \"rationale\": \"upside\"}\n```";
        let response = parse_response(raw).unwrap();
        assert_eq!(response.player.as_deref(), Some("A. Vance"));
    }

    #[test]
    fn test_parse_embedded_json() {
        let raw = r#"My answer is {"kind": "reaction", "engaged": true, "remark": "weak pick"} today."#;
        let response = parse_response(raw).unwrap();
        assert_eq!(response.engaged, Some(true));
    }

    #[test]
    fn test_parse_trailing_comma() {
        let raw = r#"{"kind": "decision", "player": "A. Vance", "rationale": "sure",}"#;
        let response = parse_response(raw).unwrap();
        assert_eq!(response.player.as_deref(), Some("A. Vance"));
    }

    #[test]
    fn test_plain_text_entity_fallback() {
        let raw = "I'm going with A. Vance here, no contest.";
        let parsed = parse_reply(raw, ReplyKind::Decision, &known()).unwrap();
        assert!(parsed.continuity_token.is_none());
        match parsed.reply {
            WorkerReply::Decision(d) => assert_eq!(d.player, "A. Vance"),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_structured_reply_carries_token() {
        let raw = r#"{"kind": "decision", "player": "A. Vance", "rationale": "sure", "continuity_token": "t9"}"#;
        let parsed = parse_reply(raw, ReplyKind::Decision, &known()).unwrap();
        assert_eq!(parsed.continuity_token.as_deref(), Some("t9"));
    }

    #[test]
    fn test_entity_match_is_case_insensitive() {
        let entity = extract_known_entity("definitely r. okafor", &known());
        assert_eq!(entity.as_deref(), Some("R. Okafor"));
    }

    #[test]
    fn test_entity_requires_word_boundary() {
        assert!(extract_known_entity("vanceworth", &vec!["vance".to_string()]).is_none());
    }

    #[test]
    fn test_unsalvageable_text_is_none() {
        assert!(parse_reply("total nonsense", ReplyKind::Decision, &known()).is_none());
    }

    #[test]
    fn test_kind_mismatch_is_none() {
        let raw = r#"{"kind": "reaction", "engaged": false}"#;
        assert!(parse_reply(raw, ReplyKind::Decision, &known()).is_none());
    }

    #[test]
    fn test_reaction_fallback_keeps_text() {
        let raw = "A. Vance? In this round? Brave.";
        let parsed = parse_reply(raw, ReplyKind::Reaction, &known()).unwrap();
        match parsed.reply {
            WorkerReply::Reaction(r) => {
                assert!(r.engaged);
                assert_eq!(r.remark.as_deref(), Some(raw));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }
}
