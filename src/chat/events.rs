//! Wire format of the chat socket.
//!
//! Server -> client events are tagged by `type`:
//! ```json
//! {"type": "HISTORY", "roomId": "...", "messages": [...]}
//! {"type": "ASSIGNED", "companyId": "...", "roomId": "..."}
//! {"type": "ASSIGNMENTS", "assignments": [...]}
//! {"type": "INFO", "message": "..."}
//! {"type": "NEW_MESSAGE", "message": {...}}
//! {"type": "ERROR", "message": "..."}
//! ```
//!
//! Client -> server is an untagged object:
//! ```json
//! {"content": "hello", "roomId": "optional for homeowners"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{Assignment, ChatMessage, ChatRoom};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    History { room_id: String, messages: Vec<ChatMessage> },
    Assigned { company_id: String, room_id: String },
    Assignments { assignments: Vec<CompanyAssignment> },
    Info { message: String },
    NewMessage { message: ChatMessage },
    Error { message: String },
}

impl ServerEvent {
    pub fn info(message: impl Into<String>) -> Self {
        ServerEvent::Info { message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error { message: message.into() }
    }
}

/// One entry of a company's caseload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyAssignment {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub room: ChatRoom,
    pub homeowner: HomeownerSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeownerSummary {
    pub id: String,
    /// Absent when the directory has no row for the homeowner.
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub content: String,
    pub room_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("payload is not JSON: {0}")]
    NotJson(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotObject,
    #[error("payload has no content")]
    MissingContent,
    #[error("roomId must be a string")]
    InvalidRoomId,
}

/// Decodes a client frame, keeping "not JSON", "wrong shape" and "valid"
/// apart so callers can log each precisely.
pub fn parse_inbound(raw: &str) -> Result<InboundMessage, InboundError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(mut fields) = value else {
        return Err(InboundError::NotObject);
    };

    let content = match fields.remove("content") {
        Some(Value::String(content)) if !content.trim().is_empty() => content,
        _ => return Err(InboundError::MissingContent),
    };

    let room_id = match fields.remove("roomId") {
        None | Some(Value::Null) => None,
        Some(Value::String(room_id)) => Some(room_id),
        Some(_) => return Err(InboundError::InvalidRoomId),
    };

    Ok(InboundMessage { content, room_id })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::auth::Role;

    #[test]
    fn parses_minimal_payload() {
        let msg = parse_inbound(r#"{"content": "hello"}"#).unwrap();
        assert_eq!(msg.content, "hello");
        assert!(msg.room_id.is_none());
    }

    #[test]
    fn parses_room_id() {
        let msg = parse_inbound(r#"{"content": "hi", "roomId": "r-1"}"#).unwrap();
        assert_eq!(msg.room_id.as_deref(), Some("r-1"));

        let msg = parse_inbound(r#"{"content": "hi", "roomId": null}"#).unwrap();
        assert!(msg.room_id.is_none());
    }

    #[test]
    fn rejection_outcomes_are_distinct() {
        assert!(matches!(parse_inbound("not json"), Err(InboundError::NotJson(_))));
        assert!(matches!(parse_inbound(r#"["content"]"#), Err(InboundError::NotObject)));
        assert!(matches!(parse_inbound(r#"{"roomId": "r"}"#), Err(InboundError::MissingContent)));
        assert!(matches!(parse_inbound(r#"{"content": "   "}"#), Err(InboundError::MissingContent)));
        assert!(matches!(parse_inbound(r#"{"content": 7}"#), Err(InboundError::MissingContent)));
        assert!(matches!(
            parse_inbound(r#"{"content": "x", "roomId": 12}"#),
            Err(InboundError::InvalidRoomId)
        ));
    }

    #[test]
    fn events_are_tagged_with_camel_case_fields() {
        let event = ServerEvent::Assigned {
            company_id: "c".to_owned(),
            room_id: "r".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "ASSIGNED", "companyId": "c", "roomId": "r"})
        );

        assert_eq!(
            serde_json::to_value(ServerEvent::error("nope")).unwrap(),
            json!({"type": "ERROR", "message": "nope"})
        );
    }

    #[test]
    fn new_message_carries_the_persisted_row() {
        let event = ServerEvent::NewMessage {
            message: ChatMessage {
                id: "m".to_owned(),
                room_id: "r".to_owned(),
                sender_id: "h".to_owned(),
                sender_role: Role::Homeowner,
                content: "hi".to_owned(),
                read: false,
                created_at: datetime!(2025-03-01 12:00:00 UTC),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "NEW_MESSAGE");
        assert_eq!(value["message"]["senderRole"], "HOMEOWNER");
        assert_eq!(value["message"]["read"], false);
        assert_eq!(value["message"]["createdAt"], "2025-03-01T12:00:00Z");

        let back: ServerEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn caseload_entries_flatten_the_assignment() {
        let at = datetime!(2025-03-01 12:00:00 UTC);
        let entry = CompanyAssignment {
            assignment: Assignment {
                id: "a".to_owned(),
                homeowner_id: "h".to_owned(),
                company_id: "c".to_owned(),
                room_id: "r".to_owned(),
                active: true,
                created_at: at,
            },
            room: ChatRoom { id: "r".to_owned(), created_at: at },
            homeowner: HomeownerSummary { id: "h".to_owned(), email: None },
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["roomId"], "r");
        assert_eq!(value["room"]["id"], "r");
        assert_eq!(value["homeowner"]["id"], "h");
    }
}
