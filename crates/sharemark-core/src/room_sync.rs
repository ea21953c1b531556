//! Room-wide replication of annotation state.
//!
//! Every participant broadcasts its own mutations. A participant that starts
//! sharing late asks the room for the completed strokes (`state_request`);
//! peers answer after a small random delay and the first answer wins.
//!
//! Time is passed in explicitly: the owner calls [`RoomSync::poll`] whenever
//! [`RoomSync::next_deadline`] has passed.

use crate::config::{AnnotationConfig, SyncConfig};
use crate::permissions::{PermissionError, Permissions};
use crate::protocol::{self, AnnotationMessage};
use crate::store::AnnotationStore;
use crate::stroke::{Point, Stroke};
use crate::tools::LocalChange;
use crate::transport::{
    BroadcastTransport, PublishOptions, RoomMembership, TransportError, TransportResult,
};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Late-joiner sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    Requesting,
    Synced,
}

/// What happened to an inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Another topic, our own echo, or a snapshot meant for someone else.
    Ignored,
    /// Could not be decoded; dropped.
    Malformed,
    /// The sender was not allowed to do this; dropped.
    Rejected(PermissionError),
    /// Applied to the store.
    Applied,
    /// Refers to a stroke we no longer (or never) had in the expected state.
    Stale,
    /// A state request we will answer after the jitter delay.
    ResponseScheduled,
    /// A state request we already answered.
    Duplicate,
    /// Our pending request was answered with this many strokes.
    SnapshotApplied(usize),
}

#[derive(Debug, Clone)]
struct PendingResponse {
    requester_id: String,
    request_id: String,
    due: Instant,
}

#[derive(Debug, Clone, Copy)]
struct RetryTimer {
    /// Number of requests sent so far minus one.
    attempt: u32,
    due: Instant,
}

/// Late-joiner protocol plus inbound message application for one client.
#[derive(Debug)]
pub struct RoomSync {
    local_id: String,
    topic: String,
    config: SyncConfig,
    rng: fastrand::Rng,
    state: SyncState,
    /// Nonce of our current request.
    request_id: Option<String>,
    /// Requests of ours that have been settled (answered or given up).
    resolved: HashSet<String>,
    /// `(requester, request)` pairs we already accepted for answering.
    answered: HashSet<(String, String)>,
    pending_responses: Vec<PendingResponse>,
    retry: Option<RetryTimer>,
}

impl RoomSync {
    pub fn new(local_id: impl Into<String>, config: &AnnotationConfig) -> Self {
        Self {
            local_id: local_id.into(),
            topic: config.topic.clone(),
            config: config.sync.clone(),
            rng: fastrand::Rng::new(),
            state: SyncState::Idle,
            request_id: None,
            resolved: HashSet::new(),
            answered: HashSet::new(),
            pending_responses: Vec::new(),
            retry: None,
        }
    }

    /// Seed the response jitter, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Nonce of the outstanding (or last) state request.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    fn publish_options(&self) -> PublishOptions {
        PublishOptions::reliable(self.topic.clone())
    }

    fn send(
        &self,
        msg: &AnnotationMessage,
        transport: &mut impl BroadcastTransport,
    ) -> TransportResult<()> {
        let bytes =
            protocol::encode(msg).map_err(|e| TransportError::Rejected(e.to_string()))?;
        log::debug!("Publishing {} ({} bytes)", msg.kind(), bytes.len());
        transport.publish(&bytes, &self.publish_options())
    }

    /// Start (or restart) catching up with the room.
    ///
    /// With nobody else in the room there is nothing to fetch and we are
    /// synced immediately. A publish failure leaves us requesting with the
    /// retry timer armed.
    pub fn activate(
        &mut self,
        now: Instant,
        transport: &mut (impl BroadcastTransport + RoomMembership),
    ) -> TransportResult<()> {
        self.retry = None;

        if transport.remote_participant_count() == 0 {
            log::info!("Alone in the room, nothing to sync");
            self.request_id = None;
            self.state = SyncState::Synced;
            return Ok(());
        }

        let request_id = Uuid::new_v4().to_string();
        log::info!(
            "Requesting annotation state from {} peer(s) (request {})",
            transport.remote_participant_count(),
            request_id
        );
        self.request_id = Some(request_id.clone());
        self.state = SyncState::Requesting;
        self.retry = Some(RetryTimer {
            attempt: 0,
            due: now + self.config.retry_timeout(0),
        });

        self.send(
            &AnnotationMessage::StateRequest {
                requester_id: self.local_id.clone(),
                request_id,
            },
            transport,
        )
    }

    /// Publish a local mutation to the room.
    pub fn broadcast(
        &self,
        change: LocalChange,
        transport: &mut impl BroadcastTransport,
    ) -> TransportResult<()> {
        self.send(&AnnotationMessage::from(change), transport)
    }

    /// Apply one payload received from the room.
    pub fn handle_message(
        &mut self,
        payload: &[u8],
        sender: &str,
        topic: &str,
        now: Instant,
        store: &mut AnnotationStore,
        permissions: &Permissions,
    ) -> InboundOutcome {
        if topic != self.topic || sender == self.local_id {
            return InboundOutcome::Ignored;
        }

        let msg = match protocol::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Dropping undecodable message from {}: {}", sender, e);
                return InboundOutcome::Malformed;
            }
        };
        log::debug!("Received {} from {}", msg.kind(), sender);

        let kind = msg.kind();
        let outcome = match msg {
            AnnotationMessage::StrokeUpdate { stroke } => {
                apply_stroke_update(stroke, sender, store, permissions)
            }
            AnnotationMessage::StrokeComplete { stroke } => {
                apply_stroke_complete(stroke, sender, store, permissions)
            }
            AnnotationMessage::StrokeDelete { stroke_id } => match store.get(&stroke_id) {
                None => InboundOutcome::Stale,
                Some(stroke) => match permissions.check_delete(sender, stroke) {
                    Ok(()) => {
                        store.delete_stroke(&stroke_id);
                        InboundOutcome::Applied
                    }
                    Err(e) => InboundOutcome::Rejected(e),
                },
            },
            AnnotationMessage::ClearAll => match permissions.check_clear_all(sender) {
                Ok(()) => {
                    store.clear_all();
                    InboundOutcome::Applied
                }
                Err(e) => InboundOutcome::Rejected(e),
            },
            AnnotationMessage::ClearParticipant { participant_id } => {
                match permissions.check_clear_participant(sender, &participant_id) {
                    Ok(()) => {
                        store.clear_by_participant(&participant_id);
                        InboundOutcome::Applied
                    }
                    Err(e) => InboundOutcome::Rejected(e),
                }
            }
            AnnotationMessage::StateRequest {
                requester_id,
                request_id,
            } => self.schedule_response(requester_id, request_id, now),
            AnnotationMessage::StateSnapshot {
                requester_id,
                request_id,
                strokes,
            } => self.accept_snapshot(&requester_id, &request_id, strokes, store),
        };

        if let InboundOutcome::Rejected(e) = &outcome {
            log::warn!("Rejected {} from {}: {}", kind, sender, e);
        }
        outcome
    }

    fn schedule_response(
        &mut self,
        requester_id: String,
        request_id: String,
        now: Instant,
    ) -> InboundOutcome {
        if requester_id == self.local_id {
            return InboundOutcome::Ignored;
        }
        // Keyed by requester and nonce: a peer that re-activates after a
        // reconnect asks under a fresh nonce and must be answered again.
        let key = (requester_id, request_id);
        if self.answered.contains(&key) {
            return InboundOutcome::Duplicate;
        }

        let jitter = Duration::from_millis(self.rng.u64(0..=self.config.jitter_max_ms));
        let (requester_id, request_id) = key.clone();
        self.answered.insert(key);
        log::debug!("Answering {} in {:?}", requester_id, jitter);
        self.pending_responses.push(PendingResponse {
            requester_id,
            request_id,
            due: now + jitter,
        });
        InboundOutcome::ResponseScheduled
    }

    fn accept_snapshot(
        &mut self,
        requester_id: &str,
        request_id: &str,
        strokes: Vec<Stroke>,
        store: &mut AnnotationStore,
    ) -> InboundOutcome {
        if requester_id != self.local_id {
            return InboundOutcome::Ignored;
        }
        let current = self.request_id.as_deref() == Some(request_id);
        if !current || self.resolved.contains(request_id) || self.state != SyncState::Requesting {
            return InboundOutcome::Stale;
        }

        store.set_strokes(strokes);
        let count = store.len();
        self.resolved.insert(request_id.to_string());
        self.retry = None;
        self.state = SyncState::Synced;
        log::info!("Synced {} stroke(s) from snapshot", count);
        InboundOutcome::SnapshotApplied(count)
    }

    /// Drop queued answers for a participant who left.
    pub fn forget_participant(&mut self, participant_id: &str) {
        self.pending_responses
            .retain(|p| p.requester_id != participant_id);
    }

    /// Send due snapshot responses and state-request retries.
    ///
    /// Every due item is attempted; the first publish error is returned.
    pub fn poll(
        &mut self,
        now: Instant,
        store: &AnnotationStore,
        transport: &mut impl BroadcastTransport,
    ) -> TransportResult<()> {
        let mut first_error = None;

        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_responses)
            .into_iter()
            .partition(|p| p.due <= now);
        self.pending_responses = waiting;

        for response in due {
            let strokes = store.completed_snapshot();
            log::info!(
                "Sending snapshot of {} stroke(s) to {}",
                strokes.len(),
                response.requester_id
            );
            let msg = AnnotationMessage::StateSnapshot {
                requester_id: response.requester_id,
                request_id: response.request_id,
                strokes,
            };
            if let Err(e) = self.send(&msg, transport) {
                log::warn!("Failed to send snapshot: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.poll_retry(now, transport) {
            log::warn!("Failed to resend state request: {}", e);
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn poll_retry(
        &mut self,
        now: Instant,
        transport: &mut impl BroadcastTransport,
    ) -> TransportResult<()> {
        let Some(retry) = self.retry else {
            return Ok(());
        };
        if retry.due > now || self.state != SyncState::Requesting {
            return Ok(());
        }
        let Some(request_id) = self.request_id.clone() else {
            self.retry = None;
            return Ok(());
        };

        if retry.attempt >= self.config.max_retries {
            log::warn!(
                "No snapshot after {} attempt(s), continuing with local state",
                retry.attempt + 1
            );
            self.resolved.insert(request_id);
            self.retry = None;
            self.state = SyncState::Synced;
            return Ok(());
        }

        let attempt = retry.attempt + 1;
        self.retry = Some(RetryTimer {
            attempt,
            due: now + self.config.retry_timeout(attempt),
        });
        log::info!("Retrying state request (attempt {})", attempt + 1);
        self.send(
            &AnnotationMessage::StateRequest {
                requester_id: self.local_id.clone(),
                request_id,
            },
            transport,
        )
    }

    /// Earliest instant at which [`RoomSync::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending_responses
            .iter()
            .map(|p| p.due)
            .chain(self.retry.map(|r| r.due))
            .min()
    }
}

fn clamp_points(points: &mut [Point]) {
    for point in points {
        *point = point.clamped();
    }
}

fn check_author(stroke: &Stroke, sender: &str) -> Result<(), PermissionError> {
    if stroke.participant_id == sender {
        Ok(())
    } else {
        Err(PermissionError::NotOwner {
            participant: sender.to_string(),
            stroke: stroke.id.clone(),
        })
    }
}

/// A stroke id already known locally stays with the participant who drew it.
fn check_existing_owner(
    id: &str,
    sender: &str,
    store: &AnnotationStore,
) -> Result<(), PermissionError> {
    match store.get(id) {
        Some(existing) => check_author(existing, sender),
        None => Ok(()),
    }
}

fn apply_stroke_update(
    mut stroke: Stroke,
    sender: &str,
    store: &mut AnnotationStore,
    permissions: &Permissions,
) -> InboundOutcome {
    if let Err(e) = check_author(&stroke, sender)
        .and_then(|()| check_existing_owner(&stroke.id, sender, store))
        .and_then(|()| permissions.check_draw(sender))
    {
        return InboundOutcome::Rejected(e);
    }
    clamp_points(&mut stroke.points);

    if store.remote_active_strokes().contains_key(&stroke.id) {
        store.update_remote_active_stroke(&stroke.id, &stroke.points);
        return InboundOutcome::Applied;
    }
    if store.get(&stroke.id).is_some() {
        return InboundOutcome::Stale;
    }
    stroke.is_complete = false;
    store.add_remote_active_stroke(stroke);
    InboundOutcome::Applied
}

fn apply_stroke_complete(
    mut stroke: Stroke,
    sender: &str,
    store: &mut AnnotationStore,
    permissions: &Permissions,
) -> InboundOutcome {
    if let Err(e) = check_author(&stroke, sender)
        .and_then(|()| check_existing_owner(&stroke.id, sender, store))
        .and_then(|()| permissions.check_draw(sender))
    {
        return InboundOutcome::Rejected(e);
    }
    clamp_points(&mut stroke.points);

    let id = stroke.id.clone();
    if store.strokes().iter().any(|s| s.id == id) {
        return InboundOutcome::Stale;
    }
    store.complete_remote_active_stroke(&id, Some(stroke));
    InboundOutcome::Applied
}
