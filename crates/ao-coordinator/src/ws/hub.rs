//! Real-time fanout (spec §4.5).
//!
//! A single broadcast channel carries every frame to every subscriber. Each
//! subscriber owns a receiver with bounded capacity; a subscriber that falls
//! behind gets `RecvError::Lagged` from `tokio::sync::broadcast` and is
//! disconnected by the caller rather than slowing down the rest.

use tokio::sync::broadcast;

use ao_protocol::event::Event;
use ao_protocol::session::Session;
use ao_protocol::ws::BroadcastFrame;

/// Bounded so a stalled subscriber can lag and be dropped instead of making
/// every producer block.
const EVENT_BUFFER_SIZE: usize = 256;

pub struct WsHub {
    tx: broadcast::Sender<BroadcastFrame>,
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WsHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastFrame> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, frame: BroadcastFrame) {
        // No receivers is not an error: broadcasting with nobody connected is normal.
        let _ = self.tx.send(frame);
    }

    pub fn session_created(&self, session: Session) {
        self.broadcast(BroadcastFrame::SessionCreated { session });
    }

    pub fn session_updated(&self, session: Session) {
        self.broadcast(BroadcastFrame::SessionUpdated { session });
    }

    pub fn session_deleted(&self, session_id: String) {
        self.broadcast(BroadcastFrame::SessionDeleted { session_id });
    }

    pub fn event(&self, data: Event) {
        self.broadcast(BroadcastFrame::Event { data });
    }
}
