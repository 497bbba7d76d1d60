//! Real-time fanout (spec §4.5): a single broadcast stream of session and
//! event frames, delivered over `/ws`.

mod handler;
mod hub;

pub use handler::ws_handler;
pub use hub::WsHub;
