//! Wire protocol for worker RPC
//!
//! The envelope shape is fixed: a request carries an opaque payload plus the
//! caller's continuity token, a response carries a typed reply plus the token
//! the worker wants the caller to present next time. The payload itself is a
//! JSON-encoded [`Payload`] so workers can route it without free-text parsing.

use serde::{Deserialize, Serialize};

/// RPC request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    /// JSON-encoded [`Payload`]
    pub payload: String,

    /// Continuity token from the worker's previous response, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuity_token: Option<String>,
}

/// Kind of reply a worker produced (or a caller expects)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    /// A pick decision
    Decision,
    /// A reaction to another worker's pick
    Reaction,
}

/// RPC response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    /// Reply kind
    pub kind: ReplyKind,

    // Decision fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banter: Option<String>,

    // Reaction fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engaged: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,

    /// Token the caller should present on its next request
    #[serde(default)]
    pub continuity_token: Option<String>,
}

/// Domain body carried inside [`WireRequest::payload`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Payload {
    /// Ask the worker for a pick
    Decision {
        /// Available candidates, formatted `Name (POS)`
        candidates: Vec<String>,
        /// Names the worker has already picked
        roster: Vec<String>,
        /// Current round
        round: u32,
    },
    /// Ask the worker to react to another worker's pick
    Reaction {
        /// Display name of the worker that picked
        subject: String,
        /// Name that was picked
        player: String,
        /// Current round
        round: u32,
    },
}

impl Payload {
    /// The reply kind this payload asks for
    pub fn expected_kind(&self) -> ReplyKind {
        match self {
            Payload::Decision { .. } => ReplyKind::Decision,
            Payload::Reaction { .. } => ReplyKind::Reaction,
        }
    }
}

/// A pick decision returned by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickDecision {
    /// Name of the picked candidate
    pub player: String,
    /// Why the worker picked it
    pub rationale: String,
    /// Optional banter aimed at the rest of the room
    pub banter: Option<String>,
}

/// A reaction to another worker's pick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickReaction {
    /// Whether the worker chose to react at all
    pub engaged: bool,
    /// The remark, when engaged
    pub remark: Option<String>,
}

/// Typed reply extracted from a [`WireResponse`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReply {
    /// A pick decision
    Decision(PickDecision),
    /// A reaction
    Reaction(PickReaction),
}

impl WorkerReply {
    /// The kind of this reply
    pub fn kind(&self) -> ReplyKind {
        match self {
            WorkerReply::Decision(_) => ReplyKind::Decision,
            WorkerReply::Reaction(_) => ReplyKind::Reaction,
        }
    }
}

impl WireResponse {
    /// Build a decision response
    pub fn decision(decision: PickDecision, continuity_token: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Decision,
            player: Some(decision.player),
            rationale: Some(decision.rationale),
            banter: decision.banter,
            engaged: None,
            remark: None,
            continuity_token: Some(continuity_token.into()),
        }
    }

    /// Build a reaction response
    pub fn reaction(reaction: PickReaction, continuity_token: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Reaction,
            player: None,
            rationale: None,
            banter: None,
            engaged: Some(reaction.engaged),
            remark: reaction.remark,
            continuity_token: Some(continuity_token.into()),
        }
    }

    /// Convert into a typed reply, dropping the envelope.
    ///
    /// Returns `None` when required fields for the declared kind are missing;
    /// that is a semantically invalid response, not a transport failure.
    pub fn into_reply(self) -> Option<WorkerReply> {
        match self.kind {
            ReplyKind::Decision => Some(WorkerReply::Decision(PickDecision {
                player: self.player?,
                rationale: self.rationale.unwrap_or_default(),
                banter: self.banter,
            })),
            ReplyKind::Reaction => Some(WorkerReply::Reaction(PickReaction {
                engaged: self.engaged?,
                remark: self.remark,
            })),
        }
    }
}

/// Bare name of a `Name (POS)` formatted candidate
pub fn entity_name(candidate: &str) -> &str {
    match candidate.rfind(" (") {
        Some(idx) if candidate.ends_with(')') => candidate[..idx].trim(),
        _ => candidate.trim(),
    }
}

/// Position tag of a `Name (POS)` formatted candidate
pub fn entity_position(candidate: &str) -> Option<&str> {
    let idx = candidate.rfind(" (")?;
    if !candidate.ends_with(')') {
        return None;
    }
    Some(candidate[idx + 2..candidate.len() - 1].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let payload = Payload::Decision {
            candidates: vec!["A. Vance (WR)".to_string()],
            roster: vec![],
            round: 1,
        };
        let request = WireRequest {
            payload: serde_json::to_string(&payload).unwrap(),
            continuity_token: Some("tok-1".to_string()),
        };
        let json = serde_json::to_string(&request).unwrap();
        let restored: WireRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.continuity_token.as_deref(), Some("tok-1"));
        let body: Payload = serde_json::from_str(&restored.payload).unwrap();
        assert_eq!(body.expected_kind(), ReplyKind::Decision);
    }

    #[test]
    fn test_token_absent_is_omitted() {
        let request = WireRequest {
            payload: "{}".to_string(),
            continuity_token: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("continuity_token"));
    }

    #[test]
    fn test_decision_response_into_reply() {
        let response = WireResponse::decision(
            PickDecision {
                player: "A. Vance".to_string(),
                rationale: "value on the board".to_string(),
                banter: None,
            },
            "tok-2",
        );
        match response.into_reply() {
            Some(WorkerReply::Decision(d)) => assert_eq!(d.player, "A. Vance"),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_decision_without_player_is_invalid() {
        let response = WireResponse {
            kind: ReplyKind::Decision,
            player: None,
            rationale: Some("no pick".to_string()),
            banter: None,
            engaged: None,
            remark: None,
            continuity_token: None,
        };
        assert!(response.into_reply().is_none());
    }

    #[test]
    fn test_reaction_response_into_reply() {
        let response = WireResponse::reaction(
            PickReaction {
                engaged: true,
                remark: Some("bold".to_string()),
            },
            "tok-3",
        );
        match response.into_reply() {
            Some(WorkerReply::Reaction(r)) => {
                assert!(r.engaged);
                assert_eq!(r.remark.as_deref(), Some("bold"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_entity_helpers() {
        assert_eq!(entity_name("A. Vance (WR)"), "A. Vance");
        assert_eq!(entity_position("A. Vance (WR)"), Some("WR"));
        assert_eq!(entity_name("A. Vance"), "A. Vance");
        assert_eq!(entity_position("A. Vance"), None);
    }
}
