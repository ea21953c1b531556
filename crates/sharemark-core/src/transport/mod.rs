//! Broadcast transport abstraction.
//!
//! The annotation engine only needs two things from the room layer: a way to
//! publish bytes to everyone else and a view of who else is in the room.

mod memory;

#[cfg(not(target_arch = "wasm32"))]
pub mod relay;

pub use memory::{MemoryHub, MemoryTransport, ReceivedPacket};

#[cfg(not(target_arch = "wasm32"))]
pub use relay::{RelayEvent, RelayTransport};

use thiserror::Error;

/// Transport errors. All of them are recoverable: local drawing continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("not in a room")]
    NotInRoom,
    #[error("publish rejected: {0}")]
    Rejected(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("transport channel closed")]
    ChannelClosed,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Options for a single publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    pub reliable: bool,
    pub topic: String,
}

impl PublishOptions {
    /// Reliable delivery on `topic`.
    pub fn reliable(topic: impl Into<String>) -> Self {
        Self {
            reliable: true,
            topic: topic.into(),
        }
    }
}

/// Publishes payloads to every other participant in the room.
///
/// Delivery order is preserved per sender; nothing is promised across senders.
pub trait BroadcastTransport {
    fn publish(&mut self, payload: &[u8], options: &PublishOptions) -> TransportResult<()>;
}

/// Current room membership as seen by this client.
pub trait RoomMembership {
    /// Identities of the other participants (excluding ourselves).
    fn remote_participants(&self) -> Vec<String>;

    fn remote_participant_count(&self) -> usize {
        self.remote_participants().len()
    }
}
