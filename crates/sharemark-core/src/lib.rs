//! Sharemark Core Library
//!
//! Annotation state, hit-testing and synchronization for drawing on top of a
//! shared screen. Every participant keeps its own [`AnnotationStore`];
//! [`RoomSync`] replicates mutations across the room and catches up late
//! joiners, and [`OverlayBridge`] mirrors the store onto a local overlay
//! window. [`AnnotationSession`] ties them together behind one owner.

pub mod bridge;
pub mod config;
pub mod geometry;
pub mod permissions;
pub mod protocol;
pub mod room_sync;
pub mod session;
pub mod shortcuts;
pub mod store;
pub mod stroke;
pub mod tools;
pub mod transport;

pub use bridge::{BridgeError, MemoryWindow, OverlayAction, OverlayBridge, WindowChannel};
pub use config::{AnnotationConfig, ConfigError, OverlayConfig, SyncConfig};
pub use geometry::{
    DEFAULT_HIT_THRESHOLD, find_strokes_at_point, find_topmost_stroke_at_point, is_point_on_stroke,
};
pub use permissions::{ParticipantRole, PermissionError, Permissions};
pub use protocol::{AnnotationMessage, ProtocolError};
pub use room_sync::{InboundOutcome, RoomSync, SyncState};
pub use session::{AnnotationSession, RenderItem, SessionError};
pub use shortcuts::{ShortcutAction, ShortcutRegistry};
pub use store::AnnotationStore;
pub use stroke::{PALETTE, Point, Stroke, StrokeTool, denormalize, normalize, participant_color};
pub use tools::{DrawingController, LocalChange, ToolKind};
pub use transport::{BroadcastTransport, PublishOptions, RoomMembership, TransportError};
