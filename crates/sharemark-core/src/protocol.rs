//! Annotation messages exchanged over the room data channel.
//!
//! Messages are JSON objects tagged by `type`:
//! ```json
//! { "type": "stroke_update", "stroke": { "id": "...", "points": [ ... ], ... } }
//! { "type": "stroke_delete", "strokeId": "..." }
//! { "type": "state_request", "requesterId": "alice", "requestId": "..." }
//! ```

use crate::stroke::Stroke;
use crate::tools::LocalChange;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors encoding or decoding annotation messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message is not valid JSON or has an unknown shape: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("empty payload")]
    Empty,
    #[error("encode failed: {0}")]
    Encode(String),
}

/// A message on the annotation topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationMessage {
    /// Points appended to an in-progress stroke. `stroke.points` holds only
    /// the new points; the first update for an id starts the stroke.
    StrokeUpdate { stroke: Stroke },
    /// A stroke was committed; carries the final stroke.
    StrokeComplete { stroke: Stroke },
    #[serde(rename_all = "camelCase")]
    StrokeDelete { stroke_id: String },
    ClearAll,
    #[serde(rename_all = "camelCase")]
    ClearParticipant { participant_id: String },
    /// A late joiner asks peers for their completed strokes.
    #[serde(rename_all = "camelCase")]
    StateRequest { requester_id: String, request_id: String },
    /// Answer to a [`AnnotationMessage::StateRequest`].
    #[serde(rename_all = "camelCase")]
    StateSnapshot {
        requester_id: String,
        request_id: String,
        strokes: Vec<Stroke>,
    },
}

impl AnnotationMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AnnotationMessage::StrokeUpdate { .. } => "stroke_update",
            AnnotationMessage::StrokeComplete { .. } => "stroke_complete",
            AnnotationMessage::StrokeDelete { .. } => "stroke_delete",
            AnnotationMessage::ClearAll => "clear_all",
            AnnotationMessage::ClearParticipant { .. } => "clear_participant",
            AnnotationMessage::StateRequest { .. } => "state_request",
            AnnotationMessage::StateSnapshot { .. } => "state_snapshot",
        }
    }
}

impl From<LocalChange> for AnnotationMessage {
    fn from(change: LocalChange) -> Self {
        match change {
            LocalChange::StrokeUpdated(stroke) => AnnotationMessage::StrokeUpdate { stroke },
            LocalChange::StrokeCompleted(stroke) => AnnotationMessage::StrokeComplete { stroke },
            LocalChange::StrokeDeleted(stroke_id) => AnnotationMessage::StrokeDelete { stroke_id },
            LocalChange::Cleared => AnnotationMessage::ClearAll,
            LocalChange::ClearedParticipant(participant_id) => {
                AnnotationMessage::ClearParticipant { participant_id }
            }
        }
    }
}

/// Serialize a message for publishing.
pub fn encode(msg: &AnnotationMessage) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Parse a received payload.
pub fn decode(bytes: &[u8]) -> Result<AnnotationMessage, ProtocolError> {
    if bytes.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::{Point, StrokeTool};

    #[test]
    fn test_wire_shape() {
        let msg = AnnotationMessage::StateRequest {
            requester_id: "bob".to_string(),
            request_id: "r1".to_string(),
        };
        let json = String::from_utf8(encode(&msg).unwrap()).unwrap();
        assert_eq!(json, r#"{"type":"state_request","requesterId":"bob","requestId":"r1"}"#);

        let json = String::from_utf8(encode(&AnnotationMessage::ClearAll).unwrap()).unwrap();
        assert_eq!(json, r#"{"type":"clear_all"}"#);
    }

    #[test]
    fn test_decode_delete() {
        let msg = decode(br#"{"type":"stroke_delete","strokeId":"abc"}"#).unwrap();
        assert_eq!(msg, AnnotationMessage::StrokeDelete { stroke_id: "abc".to_string() });
    }

    #[test]
    fn test_decode_snapshot_with_strokes() {
        let mut stroke = Stroke::with_id(
            "s1".to_string(),
            "alice",
            StrokeTool::Pen,
            "#FF5757",
            Point::new(0.1, 0.2),
        );
        stroke.complete();
        let msg = AnnotationMessage::StateSnapshot {
            requester_id: "bob".to_string(),
            request_id: "r1".to_string(),
            strokes: vec![stroke.clone()],
        };
        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        match decoded {
            AnnotationMessage::StateSnapshot { strokes, .. } => assert_eq!(strokes, vec![stroke]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b""), Err(ProtocolError::Empty)));
        assert!(matches!(decode(b"not json"), Err(ProtocolError::Decode(_))));
        assert!(matches!(decode(br#"{"type":"teleport"}"#), Err(ProtocolError::Decode(_))));
        assert!(matches!(decode(br#"{"type":"stroke_delete"}"#), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_local_change_conversion() {
        let msg: AnnotationMessage = LocalChange::ClearedParticipant("p1".to_string()).into();
        assert_eq!(msg.kind(), "clear_participant");
    }
}
