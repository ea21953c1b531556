//! In-process transport for tests and single-process demos.
//!
//! Every endpoint shares one hub. Publishing appends to the inbox of every
//! other member, so per-sender FIFO order holds. Single-threaded by
//! construction (`Rc<RefCell<_>>`).

use super::{BroadcastTransport, PublishOptions, RoomMembership, TransportError, TransportResult};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

/// A packet waiting in an endpoint's inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    pub sender: String,
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct HubState {
    /// Members in join order.
    members: Vec<String>,
    inboxes: HashMap<String, VecDeque<ReceivedPacket>>,
    /// Members whose publishes are rejected.
    offline: HashSet<String>,
    /// Members whose publishes are accepted but never delivered.
    lossy: HashSet<String>,
    published: HashMap<String, usize>,
}

/// Shared room for [`MemoryTransport`] endpoints.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    state: Rc<RefCell<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant and return its endpoint.
    pub fn join(&self, participant_id: &str) -> MemoryTransport {
        let mut state = self.state.borrow_mut();
        if !state.members.iter().any(|m| m == participant_id) {
            state.members.push(participant_id.to_string());
        }
        state.inboxes.entry(participant_id.to_string()).or_default();
        MemoryTransport {
            participant_id: participant_id.to_string(),
            hub: self.clone(),
        }
    }

    /// Remove a participant; its pending inbox is discarded.
    pub fn leave(&self, participant_id: &str) {
        let mut state = self.state.borrow_mut();
        state.members.retain(|m| m != participant_id);
        state.inboxes.remove(participant_id);
    }

    /// Make publishes from `participant_id` fail with `NotConnected`.
    pub fn set_offline(&self, participant_id: &str, offline: bool) {
        let mut state = self.state.borrow_mut();
        if offline {
            state.offline.insert(participant_id.to_string());
        } else {
            state.offline.remove(participant_id);
        }
    }

    /// Silently drop everything `participant_id` publishes.
    pub fn set_lossy(&self, participant_id: &str, lossy: bool) {
        let mut state = self.state.borrow_mut();
        if lossy {
            state.lossy.insert(participant_id.to_string());
        } else {
            state.lossy.remove(participant_id);
        }
    }

    /// How many publishes `participant_id` has made (including lost ones).
    pub fn published_count(&self, participant_id: &str) -> usize {
        self.state
            .borrow()
            .published
            .get(participant_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn members(&self) -> Vec<String> {
        self.state.borrow().members.clone()
    }
}

/// One participant's view of a [`MemoryHub`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    participant_id: String,
    hub: MemoryHub,
}

impl MemoryTransport {
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Take every packet delivered to this endpoint so far.
    pub fn drain(&self) -> Vec<ReceivedPacket> {
        let mut state = self.hub.state.borrow_mut();
        state
            .inboxes
            .get_mut(&self.participant_id)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}

impl BroadcastTransport for MemoryTransport {
    fn publish(&mut self, payload: &[u8], options: &PublishOptions) -> TransportResult<()> {
        let mut state = self.hub.state.borrow_mut();
        if !state.members.iter().any(|m| *m == self.participant_id) {
            return Err(TransportError::NotInRoom);
        }
        if state.offline.contains(&self.participant_id) {
            return Err(TransportError::NotConnected);
        }
        *state.published.entry(self.participant_id.clone()).or_default() += 1;
        if state.lossy.contains(&self.participant_id) {
            return Ok(());
        }

        let packet = ReceivedPacket {
            sender: self.participant_id.clone(),
            topic: options.topic.clone(),
            payload: payload.to_vec(),
        };
        let recipients: Vec<String> = state
            .members
            .iter()
            .filter(|m| **m != self.participant_id)
            .cloned()
            .collect();
        for member in recipients {
            if let Some(inbox) = state.inboxes.get_mut(&member) {
                inbox.push_back(packet.clone());
            }
        }
        Ok(())
    }
}

impl RoomMembership for MemoryTransport {
    fn remote_participants(&self) -> Vec<String> {
        self.hub
            .state
            .borrow()
            .members
            .iter()
            .filter(|m| **m != self.participant_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_excludes_sender() {
        let hub = MemoryHub::new();
        let mut a = hub.join("a");
        let b = hub.join("b");
        let c = hub.join("c");

        a.publish(b"one", &PublishOptions::reliable("t")).unwrap();
        a.publish(b"two", &PublishOptions::reliable("t")).unwrap();

        assert!(a.drain().is_empty());
        let got: Vec<_> = b.drain().into_iter().map(|p| p.payload).collect();
        assert_eq!(got, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(c.drain().len(), 2);
    }

    #[test]
    fn test_membership() {
        let hub = MemoryHub::new();
        let a = hub.join("a");
        assert_eq!(a.remote_participant_count(), 0);
        hub.join("b");
        assert_eq!(a.remote_participants(), vec!["b".to_string()]);
        hub.leave("b");
        assert_eq!(a.remote_participant_count(), 0);
    }

    #[test]
    fn test_offline_rejects() {
        let hub = MemoryHub::new();
        let mut a = hub.join("a");
        hub.set_offline("a", true);
        assert_eq!(
            a.publish(b"x", &PublishOptions::reliable("t")),
            Err(TransportError::NotConnected)
        );
        assert_eq!(hub.published_count("a"), 0);
    }

    #[test]
    fn test_lossy_counts_but_drops() {
        let hub = MemoryHub::new();
        let mut a = hub.join("a");
        let b = hub.join("b");
        hub.set_lossy("a", true);
        a.publish(b"x", &PublishOptions::reliable("t")).unwrap();
        assert_eq!(hub.published_count("a"), 1);
        assert!(b.drain().is_empty());
    }
}
