//! Session + Event Store (spec §4.3): session lifecycle, the append-only
//! event log, and the structured result contract.

mod repository;
mod store;

pub use repository::{EventRepository, SessionRepository};
pub use store::{AppendOutcome, SessionStore};
