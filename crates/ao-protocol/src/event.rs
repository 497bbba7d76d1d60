//! The append-only per-session event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// The type-specific payload of an event. `event_type` doubles as the serde
/// tag, so on the wire an event is a flat JSON object rather than a nested
/// `{event_type, payload}` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    SessionStart {},
    PreTool {
        tool_name: String,
        tool_input: serde_json::Value,
    },
    PostTool {
        tool_name: String,
        tool_input: serde_json::Value,
        tool_output: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Message {
        role: MessageRole,
        content: Vec<MessagePart>,
    },
    Result {
        result_text: Option<String>,
        result_data: Option<serde_json::Value>,
    },
    SessionStop {
        exit_code: i32,
        reason: String,
    },
}

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SessionStart {} => "session_start",
            Self::PreTool { .. } => "pre_tool",
            Self::PostTool { .. } => "post_tool",
            Self::Message { .. } => "message",
            Self::Result { .. } => "result",
            Self::SessionStop { .. } => "session_stop",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: i64,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventCreate {
    #[serde(flatten)]
    pub payload: EventPayload,
}
