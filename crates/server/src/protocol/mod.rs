//! Lectern Chat Wire Protocol
//!
//! JSON text frames over the WebSocket. The first client frame must be an
//! auth request; every later client frame is raw prompt text. Server frames
//! are `ChatEvent` values discriminated by a `type` tag.

use serde::{Deserialize, Serialize};

/// Close code sent when the auth handshake fails.
///
/// Distinct from the normal-closure codes so the client knows not to retry
/// with a cached credential.
pub const AUTH_FAILURE_CLOSE_CODE: u16 = 4001;

/// Server-to-client events.
///
/// `text-delta` fragments are order-significant: concatenating them in
/// arrival order reconstructs the full assistant message. Exactly one of
/// `done` or `error` terminates each turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChatEvent {
    /// Handshake accepted; prompts may follow.
    AuthOk,
    /// An incremental fragment of assistant output.
    TextDelta { delta: String },
    /// The agent invoked a named capability. The input payload is opaque.
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    /// Part of the protocol surface; the relay does not emit it today.
    ToolResult {
        name: String,
        output: serde_json::Value,
    },
    /// Terminal success for a turn. `session_id` is presented on the next
    /// prompt to continue the conversation.
    Done {
        cost: f64,
        turns: u32,
        session_id: String,
    },
    /// Terminal failure for a turn. The connection stays open; `recoverable`
    /// describes whether the turn's session context survived.
    Error { message: String, recoverable: bool },
}

/// Client-to-server structured requests.
///
/// Only the handshake uses a structured frame; prompts arrive as plain text.
/// Unknown tags fail to parse and are treated as an auth failure while the
/// connection is unauthenticated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientRequest {
    Auth { token: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_ok_serializes_with_type_tag_only() {
        let json = serde_json::to_value(&ChatEvent::AuthOk).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "auth-ok" }));
    }

    #[test]
    fn text_delta_round_trips() {
        let event = ChatEvent::TextDelta {
            delta: "hel".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"text-delta""#));
        let back: ChatEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn done_carries_cost_turns_and_session() {
        let json = serde_json::to_value(&ChatEvent::Done {
            cost: 0.042,
            turns: 3,
            session_id: "s1".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["turns"], 3);
    }

    #[test]
    fn auth_frame_parses() {
        let req: ClientRequest = serde_json::from_str(r#"{"type":"auth","token":"hunter2"}"#).unwrap();
        let ClientRequest::Auth { token } = req;
        assert_eq!(token, "hunter2");
    }

    #[test]
    fn unknown_client_frame_is_rejected() {
        assert!(serde_json::from_str::<ClientRequest>(r#"{"type":"prompt","text":"hi"}"#).is_err());
        assert!(serde_json::from_str::<ClientRequest>("just a prompt").is_err());
    }
}
