//! Room bookkeeping for the relay.
//!
//! Each room has a broadcast channel; every connection in the room holds a
//! [`Subscription`] that skips frames it sent itself. The relay keeps no
//! annotation history: a late joiner asks its peers, not the relay.

use dashmap::DashMap;
use sharemark_core::transport::relay::ServerFrame;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};

const CHANNEL_CAPACITY: usize = 1024;

/// A frame on a room channel, tagged with the participant that caused it.
pub type RoomEvent = (String, ServerFrame);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("participant id {participant} is already in room {room}")]
    ParticipantTaken { room: String, participant: String },
    #[error("participant id must not be empty")]
    EmptyParticipant,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("fell {0} frame(s) behind the room")]
    Lagged(u64),
    #[error("room closed")]
    Closed,
}

/// One member's view of a room channel.
pub struct Subscription {
    participant: String,
    rx: broadcast::Receiver<RoomEvent>,
}

impl Subscription {
    /// Next frame caused by another member.
    ///
    /// Frames dropped for a slow reader are gone for good, so lag ends the
    /// subscription instead of being skipped over.
    pub async fn recv(&mut self) -> Result<ServerFrame, SubscriptionError> {
        loop {
            match self.rx.recv().await {
                Ok((from, _)) if from == self.participant => continue,
                Ok((_, frame)) => return Ok(frame),
                Err(RecvError::Lagged(skipped)) => return Err(SubscriptionError::Lagged(skipped)),
                Err(RecvError::Closed) => return Err(SubscriptionError::Closed),
            }
        }
    }
}

struct Room {
    tx: broadcast::Sender<RoomEvent>,
    /// Members in join order.
    members: Vec<String>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            members: Vec::new(),
        }
    }
}

/// Active rooms, shared by every connection.
#[derive(Default)]
pub struct Rooms {
    rooms: DashMap<String, Room>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `participant` to `room`, announcing it to the others.
    ///
    /// Returns the member's subscription and the members already present.
    pub fn join(
        &self,
        room_id: &str,
        participant: &str,
    ) -> Result<(Subscription, Vec<String>), RoomError> {
        if participant.is_empty() {
            return Err(RoomError::EmptyParticipant);
        }
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(Room::new);
        if room.members.iter().any(|m| m == participant) {
            return Err(RoomError::ParticipantTaken {
                room: room_id.to_string(),
                participant: participant.to_string(),
            });
        }

        let others = room.members.clone();
        room.members.push(participant.to_string());
        let subscription = Subscription {
            participant: participant.to_string(),
            rx: room.tx.subscribe(),
        };
        let _ = room.tx.send((
            participant.to_string(),
            ServerFrame::ParticipantJoined {
                participant_id: participant.to_string(),
            },
        ));
        Ok((subscription, others))
    }

    /// Remove `participant` from `room`, announcing it to the others.
    /// Empty rooms are dropped.
    pub fn leave(&self, room_id: &str, participant: &str) {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return;
        };
        let before = room.members.len();
        room.members.retain(|m| m != participant);
        if room.members.len() == before {
            return;
        }

        if room.members.is_empty() {
            drop(room);
            self.drop_if_empty(room_id);
            return;
        }
        let _ = room.tx.send((
            participant.to_string(),
            ServerFrame::ParticipantLeft {
                participant_id: participant.to_string(),
            },
        ));
    }

    /// Someone may have joined since the last member left.
    fn drop_if_empty(&self, room_id: &str) {
        self.rooms.remove_if(room_id, |_, room| room.members.is_empty());
    }

    /// Fan a payload out to every other member of the room.
    pub fn publish(&self, room_id: &str, from: &str, topic: String, data: String) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((
                from.to_string(),
                ServerFrame::Data {
                    from: from.to_string(),
                    topic,
                    data,
                },
            ));
        }
    }

    pub fn members(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
