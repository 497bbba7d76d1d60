//! Wire and domain types shared between the coordinator and its HTTP clients
//! (runners, dashboards). Kept storage-agnostic: no sqlx, no axum.

pub mod agent;
pub mod event;
pub mod ids;
pub mod run;
pub mod runner;
pub mod session;
pub mod ws;

pub use agent::{AgentBlueprint, AgentStatus, AgentType};
pub use event::{Event, EventPayload, MessagePart, MessageRole};
pub use run::{Demands, ExecutionMode, Run, RunStatus, RunType};
pub use runner::{Capabilities, RunnerInfo, RunnerStatus};
pub use session::{Session, SessionStatus};
pub use ws::BroadcastFrame;
