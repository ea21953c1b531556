//! One participant's annotation session.
//!
//! [`AnnotationSession`] owns every piece of annotation state for a client
//! and is the only way to mutate it. Pointer input, keyboard shortcuts,
//! packets from the room, overlay events, membership changes and timers all
//! go through it, from a single thread.

use crate::bridge::{BridgeError, MemoryWindow, OverlayAction, OverlayBridge, WindowChannel};
use crate::config::AnnotationConfig;
use crate::permissions::{ParticipantRole, PermissionError, Permissions};
use crate::room_sync::{InboundOutcome, RoomSync, SyncState};
use crate::shortcuts::{ShortcutAction, ShortcutRegistry};
use crate::store::AnnotationStore;
use crate::stroke::{Point, Stroke};
use crate::tools::{DrawingController, LocalChange, ToolKind, stroke_delta};
use crate::transport::{BroadcastTransport, RoomMembership, TransportError};
use serde_json::Value;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
}

/// A stroke as it should be drawn this frame.
#[derive(Debug, Clone, Copy)]
pub struct RenderItem<'a> {
    pub stroke: &'a Stroke,
    /// Under the eraser.
    pub hovered: bool,
    pub in_progress: bool,
}

/// Owned annotation state for one participant.
pub struct AnnotationSession<T, W = MemoryWindow>
where
    T: BroadcastTransport + RoomMembership,
    W: WindowChannel,
{
    config: AnnotationConfig,
    store: AnnotationStore,
    controller: DrawingController,
    permissions: Permissions,
    sync: RoomSync,
    transport: T,
    overlay: Option<OverlayBridge<W>>,
}

impl<T, W> AnnotationSession<T, W>
where
    T: BroadcastTransport + RoomMembership,
    W: WindowChannel,
{
    pub fn new(
        participant_id: &str,
        role: ParticipantRole,
        config: AnnotationConfig,
        transport: T,
    ) -> Self {
        let mut permissions = Permissions::new();
        permissions.set_role(participant_id, role);
        Self {
            controller: DrawingController::new(participant_id)
                .with_hit_threshold(config.hit_threshold),
            sync: RoomSync::new(participant_id, &config),
            store: AnnotationStore::new(),
            permissions,
            transport,
            overlay: None,
            config,
        }
    }

    /// Seed the late-joiner response jitter.
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.sync = self.sync.with_seed(seed);
        self
    }

    pub fn participant_id(&self) -> &str {
        self.controller.participant_id()
    }

    pub fn config(&self) -> &AnnotationConfig {
        &self.config
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn controller(&self) -> &DrawingController {
        &self.controller
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn overlay(&self) -> Option<&OverlayBridge<W>> {
        self.overlay.as_ref()
    }

    // --- Local input ---

    pub fn set_tool(&mut self, tool: ToolKind) {
        self.controller.set_tool(tool);
    }

    pub fn set_color(&mut self, color: impl Into<String>) {
        self.controller.set_color(color);
    }

    pub fn pointer_down(&mut self, point: Point) -> Result<(), SessionError> {
        let change = self
            .controller
            .pointer_down(point, &mut self.store, &self.permissions)?;
        self.commit(change)
    }

    pub fn pointer_move(&mut self, point: Point) -> Result<(), SessionError> {
        let change = self.controller.pointer_move(point, &mut self.store);
        self.commit(change)
    }

    pub fn pointer_up(&mut self) -> Result<(), SessionError> {
        let change = self.controller.pointer_up(&mut self.store);
        self.commit(change)
    }

    pub fn pointer_leave(&mut self) -> Result<(), SessionError> {
        let change = self.controller.pointer_leave(&mut self.store);
        self.commit(change)
    }

    pub fn delete_stroke(&mut self, stroke_id: &str) -> Result<(), SessionError> {
        let change = self
            .controller
            .delete_stroke(stroke_id, &mut self.store, &self.permissions)?;
        self.commit(change)
    }

    pub fn clear_all(&mut self) -> Result<(), SessionError> {
        let change = self.controller.clear_all(&mut self.store, &self.permissions)?;
        self.commit(Some(change))
    }

    pub fn clear_mine(&mut self) -> Result<(), SessionError> {
        let change = self
            .controller
            .clear_mine(&mut self.store, &self.permissions)?;
        self.commit(Some(change))
    }

    /// Handle a key press. Returns whether a shortcut matched.
    pub fn handle_key(&mut self, key: &str, ctrl: bool, shift: bool) -> Result<bool, SessionError> {
        let Some(action) = ShortcutRegistry::resolve(key, ctrl, shift) else {
            return Ok(false);
        };
        match action {
            ShortcutAction::SelectTool(tool) => self.set_tool(tool),
            ShortcutAction::ClearMine => self.clear_mine()?,
            ShortcutAction::ClearAll => self.clear_all()?,
        }
        Ok(true)
    }

    /// Mirror to the overlay, then tell the room.
    fn commit(&mut self, change: Option<LocalChange>) -> Result<(), SessionError> {
        let mirrored = self.sync_overlay();
        if let Some(change) = change {
            if let Err(e) = self.sync.broadcast(change, &mut self.transport) {
                log::warn!("Broadcast failed, continuing locally: {}", e);
                return Err(e.into());
            }
        }
        mirrored
    }

    fn sync_overlay(&mut self) -> Result<(), SessionError> {
        if let Some(overlay) = self.overlay.as_mut() {
            if let Err(e) = overlay.sync(&self.store) {
                log::warn!("Overlay update failed: {}", e);
                return Err(e.into());
            }
        }
        Ok(())
    }

    // --- Room ---

    /// Screen share started: catch up with the room.
    pub fn activate_sync(&mut self, now: Instant) -> Result<(), SessionError> {
        self.sync.activate(now, &mut self.transport)?;
        Ok(())
    }

    /// A payload arrived from `sender` on `topic`.
    pub fn handle_data(
        &mut self,
        payload: &[u8],
        sender: &str,
        topic: &str,
        now: Instant,
    ) -> InboundOutcome {
        let outcome = self.sync.handle_message(
            payload,
            sender,
            topic,
            now,
            &mut self.store,
            &self.permissions,
        );
        // Overlay failures are logged in sync_overlay and retried on the next change.
        let _ = self.sync_overlay();
        outcome
    }

    pub fn participant_joined(&mut self, participant_id: &str, role: Option<ParticipantRole>) {
        log::info!("{} joined", participant_id);
        if let Some(role) = role {
            self.permissions.set_role(participant_id, role);
        }
    }

    /// A participant left: their completed strokes stay, anything they were
    /// still drawing is dropped.
    pub fn participant_left(&mut self, participant_id: &str) {
        let dropped = self.store.discard_remote_active_by_participant(participant_id);
        log::info!(
            "{} left ({} in-progress stroke(s) dropped)",
            participant_id,
            dropped
        );
        self.permissions.remove(participant_id);
        self.sync.forget_participant(participant_id);
        let _ = self.sync_overlay();
    }

    pub fn set_participant_role(&mut self, participant_id: &str, role: ParticipantRole) {
        self.permissions.set_role(participant_id, role);
    }

    pub fn set_annotations_enabled(&mut self, enabled: bool) {
        log::info!("Annotations {}", if enabled { "enabled" } else { "disabled" });
        self.permissions.set_annotations_enabled(enabled);
    }

    // --- Overlay ---

    /// Show the overlay and start pushing state to it.
    pub fn attach_overlay(&mut self, channel: W, now: Instant) {
        let mut bridge = OverlayBridge::new(channel, &self.config.overlay);
        bridge.activate(now);
        self.overlay = Some(bridge);
    }

    pub fn detach_overlay(&mut self) {
        if let Some(mut bridge) = self.overlay.take() {
            bridge.deactivate();
        }
    }

    /// An event arrived from the overlay window.
    pub fn handle_overlay_event(
        &mut self,
        name: &str,
        payload: &Value,
        now: Instant,
    ) -> Result<(), SessionError> {
        let Some(overlay) = self.overlay.as_mut() else {
            log::debug!("Overlay event {} with no overlay attached", name);
            return Ok(());
        };
        let action = overlay.handle_event(name, payload)?;

        let result = match action {
            Some(action) => self.apply_overlay_action(action),
            None => Ok(None),
        };
        let change = match result {
            Ok(change) => change,
            Err(e) => {
                // The overlay already shows its own edit; restore it.
                log::warn!("Overlay {} refused: {}", name, e);
                if let Some(overlay) = self.overlay.as_mut() {
                    overlay.request_full_state();
                    overlay.poll(now, &self.store)?;
                }
                return Err(e);
            }
        };

        if let Some(overlay) = self.overlay.as_mut() {
            overlay.poll(now, &self.store)?;
        }
        self.commit(change)
    }

    fn apply_overlay_action(
        &mut self,
        action: OverlayAction,
    ) -> Result<Option<LocalChange>, SessionError> {
        let local_id = self.participant_id().to_string();
        let change = match action {
            OverlayAction::StrokeStart {
                stroke_id,
                tool,
                color,
                point,
            } => {
                let busy = self.store.active_stroke().map(|s| s.id.clone());
                if busy.as_deref() == Some(stroke_id.as_str()) {
                    return Ok(None);
                }
                let refused = self.permissions.check_draw(&local_id).err();
                if refused.is_some() || busy.is_some() {
                    // The overlay is already drawing it; take it back off the overlay.
                    if let Some(overlay) = self.overlay.as_mut() {
                        overlay.forget_overlay_stroke(&stroke_id);
                        overlay.request_full_state();
                    }
                }
                if let Some(e) = refused {
                    return Err(e.into());
                }
                if busy.is_some() {
                    log::debug!("Ignoring overlay stroke {} while another is active", stroke_id);
                    return Ok(None);
                }
                let stroke = Stroke::with_id(stroke_id, &local_id, tool, &color, point.clamped());
                self.store.set_active_stroke(Some(stroke.clone()));
                Some(LocalChange::StrokeUpdated(stroke))
            }
            OverlayAction::StrokePoints { stroke_id, points } => {
                let Some(from) = self
                    .store
                    .active_stroke()
                    .filter(|s| s.id == stroke_id)
                    .map(Stroke::len)
                else {
                    return Ok(None);
                };
                let points: Vec<Point> = points.into_iter().map(Point::clamped).collect();
                self.store.update_stroke(&stroke_id, &points);
                self.store
                    .active_stroke()
                    .map(|s| LocalChange::StrokeUpdated(stroke_delta(s, from)))
            }
            OverlayAction::StrokeComplete { stroke_id } => self
                .store
                .complete_stroke(&stroke_id)
                .map(LocalChange::StrokeCompleted),
            OverlayAction::StrokeDelete { stroke_id } => {
                self.controller
                    .delete_stroke(&stroke_id, &mut self.store, &self.permissions)?
            }
            OverlayAction::ClearAll => {
                let change = if self.permissions.is_host(&local_id) {
                    self.controller.clear_all(&mut self.store, &self.permissions)?
                } else {
                    self.controller.clear_mine(&mut self.store, &self.permissions)?
                };
                if !self.store.is_empty() {
                    if let Some(overlay) = self.overlay.as_mut() {
                        overlay.request_full_state();
                    }
                }
                Some(change)
            }
        };
        Ok(change)
    }

    // --- Timers ---

    /// Drive due timers: snapshot responses, request retries, overlay pushes.
    pub fn poll(&mut self, now: Instant) -> Result<(), SessionError> {
        let synced = self.sync.poll(now, &self.store, &mut self.transport);
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.poll(now, &self.store)?;
        }
        synced?;
        Ok(())
    }

    /// When [`AnnotationSession::poll`] next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let overlay = self.overlay.as_ref().and_then(OverlayBridge::next_deadline);
        match (self.sync.next_deadline(), overlay) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // --- Rendering ---

    /// Strokes back to front, with hover and in-progress flags.
    pub fn render_list(&self) -> Vec<RenderItem<'_>> {
        let hovered = self.controller.hovered_stroke_id();
        self.store
            .render_order()
            .into_iter()
            .map(|stroke| RenderItem {
                stroke,
                hovered: hovered == Some(stroke.id.as_str()),
                in_progress: !stroke.is_complete,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryHub, MemoryTransport};
    use serde_json::json;
    use std::time::Duration;

    type Session = AnnotationSession<MemoryTransport>;

    fn session(hub: &MemoryHub, id: &str, role: ParticipantRole) -> Session {
        AnnotationSession::new(id, role, AnnotationConfig::default(), hub.join(id))
            .with_jitter_seed(7)
    }

    fn pump(session: &mut Session, now: Instant) -> Vec<InboundOutcome> {
        let packets = session.transport().drain();
        packets
            .into_iter()
            .map(|p| session.handle_data(&p.payload, &p.sender, &p.topic, now))
            .collect()
    }

    fn draw(session: &mut Session, points: &[(f64, f64)]) {
        session.set_tool(ToolKind::Pen);
        session.pointer_down(Point::new(points[0].0, points[0].1)).unwrap();
        for &(x, y) in &points[1..] {
            session.pointer_move(Point::new(x, y)).unwrap();
        }
        session.pointer_up().unwrap();
    }

    #[test]
    fn test_strokes_reach_peers() {
        let hub = MemoryHub::new();
        let t0 = Instant::now();
        let mut alice = session(&hub, "alice", ParticipantRole::Host);
        let mut bob = session(&hub, "bob", ParticipantRole::Annotator);

        alice.set_tool(ToolKind::Pen);
        alice.pointer_down(Point::new(0.1, 0.1)).unwrap();
        alice.pointer_move(Point::new(0.2, 0.2)).unwrap();
        pump(&mut bob, t0);
        assert_eq!(bob.store().remote_active_strokes().len(), 1);
        let items = bob.render_list();
        assert!(items[0].in_progress);

        alice.pointer_move(Point::new(0.3, 0.3)).unwrap();
        alice.pointer_up().unwrap();
        pump(&mut bob, t0);
        assert_eq!(bob.store().strokes(), alice.store().strokes());
        assert_eq!(bob.store().strokes()[0].len(), 3);
    }

    #[test]
    fn test_late_joiner_scenario() {
        let hub = MemoryHub::new();
        let t0 = Instant::now();
        let mut a = session(&hub, "a", ParticipantRole::Host);
        a.activate_sync(t0).unwrap();
        assert_eq!(a.sync_state(), SyncState::Synced);
        assert_eq!(hub.published_count("a"), 0);
        draw(&mut a, &[(0.1, 0.1), (0.5, 0.5), (0.9, 0.1)]);

        let mut b = session(&hub, "b", ParticipantRole::Annotator);
        b.activate_sync(t0).unwrap();
        assert_eq!(b.sync_state(), SyncState::Requesting);

        pump(&mut a, t0);
        let due = a.next_deadline().unwrap();
        a.poll(due).unwrap();
        pump(&mut b, due);

        assert_eq!(b.sync_state(), SyncState::Synced);
        assert_eq!(b.store().strokes(), a.store().strokes());
        assert_eq!(b.store().len(), 1);
    }

    #[test]
    fn test_eraser_scenario() {
        let hub = MemoryHub::new();
        let mut me = session(&hub, "me", ParticipantRole::Annotator);
        draw(&mut me, &[(0.2, 0.5), (0.8, 0.5)]);

        me.set_tool(ToolKind::Eraser);
        me.pointer_down(Point::new(0.5, 0.8)).unwrap();
        assert_eq!(me.store().len(), 1);

        me.pointer_move(Point::new(0.5, 0.51)).unwrap();
        assert!(me.render_list()[0].hovered);

        me.pointer_down(Point::new(0.5, 0.51)).unwrap();
        assert!(me.store().is_empty());
    }

    #[test]
    fn test_shortcuts() {
        let hub = MemoryHub::new();
        let mut guest = session(&hub, "guest", ParticipantRole::Annotator);
        draw(&mut guest, &[(0.1, 0.1), (0.2, 0.2)]);

        assert!(guest.handle_key("e", false, false).unwrap());
        assert_eq!(guest.controller().tool(), ToolKind::Eraser);
        assert!(!guest.handle_key("q", false, false).unwrap());

        assert!(matches!(
            guest.handle_key("X", true, true),
            Err(SessionError::Permission(PermissionError::NotHost(_)))
        ));
        assert_eq!(guest.store().len(), 1);

        assert!(guest.handle_key("X", true, false).unwrap());
        assert!(guest.store().is_empty());
    }

    #[test]
    fn test_viewer_cannot_draw() {
        let hub = MemoryHub::new();
        let mut viewer = session(&hub, "v", ParticipantRole::Viewer);
        viewer.set_tool(ToolKind::Pen);
        assert!(matches!(
            viewer.pointer_down(Point::new(0.5, 0.5)),
            Err(SessionError::Permission(PermissionError::Viewer(_)))
        ));
        assert!(viewer.store().is_empty());
        assert_eq!(hub.published_count("v"), 0);
    }

    #[test]
    fn test_publish_failure_keeps_local_stroke() {
        let hub = MemoryHub::new();
        let mut me = session(&hub, "me", ParticipantRole::Annotator);
        hub.set_offline("me", true);

        me.set_tool(ToolKind::Pen);
        assert!(matches!(
            me.pointer_down(Point::new(0.5, 0.5)),
            Err(SessionError::Transport(TransportError::NotConnected))
        ));
        assert!(me.store().active_stroke().is_some());
        let _ = me.pointer_up();
        assert_eq!(me.store().len(), 1);
    }

    #[test]
    fn test_departed_participant_in_progress_dropped() {
        let hub = MemoryHub::new();
        let t0 = Instant::now();
        let mut a = session(&hub, "a", ParticipantRole::Annotator);
        let mut b = session(&hub, "b", ParticipantRole::Annotator);

        draw(&mut a, &[(0.1, 0.1), (0.2, 0.2)]);
        a.pointer_down(Point::new(0.5, 0.5)).unwrap();
        pump(&mut b, t0);
        assert_eq!(b.store().len(), 1);
        assert_eq!(b.store().remote_active_strokes().len(), 1);

        hub.leave("a");
        b.participant_left("a");
        assert_eq!(b.store().len(), 1);
        assert!(b.store().remote_active_strokes().is_empty());
    }

    #[test]
    fn test_render_order_puts_local_stroke_last() {
        let hub = MemoryHub::new();
        let t0 = Instant::now();
        let mut a = session(&hub, "a", ParticipantRole::Annotator);
        let mut b = session(&hub, "b", ParticipantRole::Annotator);

        draw(&mut b, &[(0.1, 0.1)]);
        b.set_tool(ToolKind::Pen);
        b.pointer_down(Point::new(0.3, 0.3)).unwrap();
        a.set_tool(ToolKind::Pen);
        a.pointer_down(Point::new(0.4, 0.4)).unwrap();
        pump(&mut b, t0);

        let authors: Vec<&str> = b
            .render_list()
            .iter()
            .map(|item| item.stroke.participant_id.as_str())
            .collect();
        assert_eq!(authors, vec!["b", "a", "b"]);
        assert!(b.render_list()[2].in_progress);
    }

    #[test]
    fn test_overlay_stroke_folded_once_and_shared() {
        let hub = MemoryHub::new();
        let t0 = Instant::now();
        let mut sharer = session(&hub, "sharer", ParticipantRole::Host);
        let mut peer = session(&hub, "peer", ParticipantRole::Annotator);
        let window = MemoryWindow::new();

        sharer.attach_overlay(window.clone(), t0);
        sharer.poll(t0).unwrap();
        let pushed = window.take();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, "full_state");

        let start = json!({
            "strokeId": "o1",
            "tool": "pen",
            "color": "#FF5757",
            "point": { "x": 0.2, "y": 0.2 }
        });
        sharer.handle_overlay_event("stroke-start", &start, t0).unwrap();
        // Redelivery of the start is harmless.
        sharer.handle_overlay_event("stroke-start", &start, t0).unwrap();
        sharer
            .handle_overlay_event(
                "stroke-point",
                &json!({ "strokeId": "o1", "points": [{ "x": 0.3, "y": 0.3 }] }),
                t0,
            )
            .unwrap();
        sharer
            .handle_overlay_event("stroke-complete", &json!({ "strokeId": "o1" }), t0)
            .unwrap();
        sharer
            .handle_overlay_event("stroke-complete", &json!({ "strokeId": "o1" }), t0)
            .unwrap();

        assert_eq!(sharer.store().len(), 1);
        assert_eq!(sharer.store().strokes()[0].id, "o1");
        assert_eq!(sharer.store().strokes()[0].len(), 2);
        assert!(window.take().is_empty());

        pump(&mut peer, t0);
        assert_eq!(peer.store().strokes(), sharer.store().strokes());

        // Remaining scheduled pushes still go out.
        sharer.poll(t0 + Duration::from_millis(300)).unwrap();
        let names: Vec<String> = window.take().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["full_state"]);
    }

    #[test]
    fn test_overlay_sees_remote_strokes() {
        let hub = MemoryHub::new();
        let t0 = Instant::now();
        let mut sharer = session(&hub, "sharer", ParticipantRole::Host);
        let mut peer = session(&hub, "peer", ParticipantRole::Annotator);
        let window = MemoryWindow::new();
        sharer.attach_overlay(window.clone(), t0);
        sharer.poll(t0 + Duration::from_secs(1)).unwrap();
        window.take();

        draw(&mut peer, &[(0.1, 0.1), (0.2, 0.2)]);
        pump(&mut sharer, t0);
        let names: Vec<String> = window.take().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["stroke_update", "stroke_update", "stroke_complete"]);
    }

    #[test]
    fn test_overlay_stroke_ignored_while_main_draws() {
        let hub = MemoryHub::new();
        let t0 = Instant::now();
        let mut sharer = session(&hub, "sharer", ParticipantRole::Host);
        let window = MemoryWindow::new();
        sharer.attach_overlay(window.clone(), t0);
        sharer.poll(t0 + Duration::from_secs(1)).unwrap();

        sharer.set_tool(ToolKind::Pen);
        sharer.pointer_down(Point::new(0.5, 0.5)).unwrap();
        window.take();

        let start = json!({
            "strokeId": "o1",
            "tool": "pen",
            "color": "#FF5757",
            "point": { "x": 0.2, "y": 0.2 }
        });
        sharer.handle_overlay_event("stroke-start", &start, t0).unwrap();

        assert!(sharer.store().get("o1").is_none());
        assert!(!sharer.overlay().unwrap().is_overlay_originated("o1"));
        assert_eq!(window.names(), vec!["full_state"]);
    }

    #[test]
    fn test_refused_overlay_delete_restores_overlay() {
        let hub = MemoryHub::new();
        let t0 = Instant::now();
        let mut sharer = session(&hub, "sharer", ParticipantRole::Annotator);
        let mut peer = session(&hub, "peer", ParticipantRole::Annotator);
        let window = MemoryWindow::new();
        sharer.attach_overlay(window.clone(), t0);
        sharer.poll(t0 + Duration::from_secs(1)).unwrap();

        draw(&mut peer, &[(0.1, 0.1)]);
        pump(&mut sharer, t0);
        window.take();
        let id = sharer.store().strokes()[0].id.clone();

        let result = sharer.handle_overlay_event("stroke-delete", &json!({ "strokeId": id }), t0);
        assert!(matches!(result, Err(SessionError::Permission(PermissionError::NotOwner { .. }))));
        assert_eq!(sharer.store().len(), 1);
        assert_eq!(window.names(), vec!["full_state"]);
    }
}
