//! Real-time fanout broadcast frames.

use serde::Serialize;

use crate::event::Event;
use crate::session::Session;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastFrame {
    Init { sessions: Vec<Session> },
    SessionCreated { session: Session },
    SessionUpdated { session: Session },
    SessionDeleted { session_id: String },
    Event { data: Event },
}
