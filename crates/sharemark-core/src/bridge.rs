//! Local mirror between the main window's store and the on-screen overlay.
//!
//! The overlay is a second rendering surface over the sharer's screen. It
//! never joins the room; it only talks to its own main side through a
//! [`WindowChannel`]. The main side pushes the full state on activation and
//! then forwards granular changes. Strokes drawn on the overlay come back as
//! [`OverlayAction`]s and are never echoed to it.

use crate::config::OverlayConfig;
use crate::store::AnnotationStore;
use crate::stroke::{Point, Stroke, StrokeTool};
use serde::Deserialize;
use serde_json::{Value, json};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to emit {event}: {reason}")]
    Emit { event: String, reason: String },
    #[error("unknown overlay event: {0}")]
    UnknownEvent(String),
    #[error("malformed {event} payload: {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Named-event channel to the overlay window.
pub trait WindowChannel {
    fn emit(&mut self, event: &str, payload: &Value) -> Result<(), BridgeError>;
}

/// Records emitted events in memory. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct MemoryWindow {
    events: Rc<RefCell<Vec<(String, Value)>>>,
    failing: Rc<RefCell<bool>>,
}

impl MemoryWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every event emitted so far.
    pub fn take(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// Names of the events emitted so far, without consuming them.
    pub fn names(&self) -> Vec<String> {
        self.events.borrow().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Make every emit fail, as if the overlay window were gone.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.borrow_mut() = failing;
    }
}

impl WindowChannel for MemoryWindow {
    fn emit(&mut self, event: &str, payload: &Value) -> Result<(), BridgeError> {
        if *self.failing.borrow() {
            return Err(BridgeError::Emit {
                event: event.to_string(),
                reason: "window closed".to_string(),
            });
        }
        self.events
            .borrow_mut()
            .push((event.to_string(), payload.clone()));
        Ok(())
    }
}

/// A mutation drawn or erased on the overlay, to be folded into the store.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayAction {
    StrokeStart {
        stroke_id: String,
        tool: StrokeTool,
        color: String,
        point: Point,
    },
    StrokePoints {
        stroke_id: String,
        points: Vec<Point>,
    },
    StrokeComplete {
        stroke_id: String,
    },
    StrokeDelete {
        stroke_id: String,
    },
    ClearAll,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StrokeStartPayload {
    stroke_id: String,
    tool: StrokeTool,
    color: String,
    point: Point,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StrokePointPayload {
    stroke_id: String,
    points: Vec<Point>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StrokeIdPayload {
    stroke_id: String,
}

fn parse<T: for<'de> Deserialize<'de>>(event: &str, payload: &Value) -> Result<T, BridgeError> {
    T::deserialize(payload).map_err(|source| BridgeError::Malformed {
        event: event.to_string(),
        source,
    })
}

/// What the overlay was last told about a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Forwarded {
    points: usize,
    complete: bool,
}

/// Main-side half of the overlay mirror.
pub struct OverlayBridge<W: WindowChannel> {
    channel: W,
    push_delays: Vec<Duration>,
    active: bool,
    /// Scheduled `full_state` pushes.
    pending_pushes: Vec<Instant>,
    full_state_requested: bool,
    /// Last-forwarded view of the store, keyed by stroke id.
    forwarded: HashMap<String, Forwarded>,
    /// Strokes drawn on the overlay itself.
    overlay_originated: HashSet<String>,
    /// Store revision at the last diff.
    last_revision: Option<u64>,
}

impl<W: WindowChannel> OverlayBridge<W> {
    pub fn new(channel: W, config: &OverlayConfig) -> Self {
        Self {
            channel,
            push_delays: config.push_delays(),
            active: false,
            pending_pushes: Vec::new(),
            full_state_requested: false,
            forwarded: HashMap::new(),
            overlay_originated: HashSet::new(),
            last_revision: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn channel(&self) -> &W {
        &self.channel
    }

    pub fn is_overlay_originated(&self, stroke_id: &str) -> bool {
        self.overlay_originated.contains(stroke_id)
    }

    /// Stop treating `stroke_id` as drawn on the overlay.
    pub fn forget_overlay_stroke(&mut self, stroke_id: &str) {
        self.overlay_originated.remove(stroke_id);
    }

    /// Overlay shown: schedule the full-state pushes.
    pub fn activate(&mut self, now: Instant) {
        log::info!("Overlay activated");
        self.active = true;
        self.pending_pushes = self.push_delays.iter().map(|d| now + *d).collect();
        self.forwarded.clear();
        self.last_revision = None;
    }

    /// Overlay hidden: cancel pending pushes and forget what it was told.
    pub fn deactivate(&mut self) {
        log::info!("Overlay deactivated");
        self.active = false;
        self.pending_pushes.clear();
        self.full_state_requested = false;
        self.forwarded.clear();
        self.overlay_originated.clear();
        self.last_revision = None;
    }

    /// Ask for a `full_state` push on the next poll.
    pub fn request_full_state(&mut self) {
        self.full_state_requested = true;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.active {
            return None;
        }
        self.pending_pushes.iter().min().copied()
    }

    /// Run due pushes, then forward whatever changed since the last call.
    pub fn poll(&mut self, now: Instant, store: &AnnotationStore) -> Result<(), BridgeError> {
        if !self.active {
            return Ok(());
        }
        let before = self.pending_pushes.len();
        self.pending_pushes.retain(|due| *due > now);
        if self.pending_pushes.len() < before || self.full_state_requested {
            self.full_state_requested = false;
            self.push_full_state(store)?;
        }
        self.sync(store)
    }

    fn emit(&mut self, event: &str, payload: Value) -> Result<(), BridgeError> {
        log::debug!("Overlay <- {}", event);
        self.channel.emit(event, &payload)
    }

    /// Send everything: completed strokes and every in-progress stroke.
    pub fn push_full_state(&mut self, store: &AnnotationStore) -> Result<(), BridgeError> {
        let active: Vec<&Stroke> = store.in_progress();
        self.emit(
            "full_state",
            json!({ "strokes": store.strokes(), "activeStrokes": active }),
        )?;
        self.forwarded = snapshot(store);
        self.last_revision = Some(store.revision());
        Ok(())
    }

    /// Forward store changes since the last call as granular events.
    pub fn sync(&mut self, store: &AnnotationStore) -> Result<(), BridgeError> {
        if !self.active || self.last_revision == Some(store.revision()) {
            return Ok(());
        }
        let current = snapshot(store);

        if store.is_empty() && !self.forwarded.is_empty() {
            self.emit("clear_all", json!({}))?;
            self.forwarded.clear();
            self.overlay_originated.clear();
            self.last_revision = Some(store.revision());
            return Ok(());
        }

        let gone: Vec<String> = self
            .forwarded
            .keys()
            .filter(|id| !current.contains_key(*id))
            .cloned()
            .collect();
        for id in gone {
            self.emit("stroke_delete", json!({ "strokeId": id }))?;
            self.forwarded.remove(&id);
            self.overlay_originated.remove(&id);
        }

        for stroke in store.render_order() {
            let Some(seen) = current.get(&stroke.id).copied() else {
                continue;
            };
            let before = self.forwarded.get(&stroke.id).copied();
            if before == Some(seen) || self.overlay_originated.contains(&stroke.id) {
                self.forwarded.insert(stroke.id.clone(), seen);
                continue;
            }
            let event = if seen.complete {
                "stroke_complete"
            } else {
                "stroke_update"
            };
            self.emit(event, json!({ "stroke": stroke }))?;
            self.forwarded.insert(stroke.id.clone(), seen);
        }

        self.last_revision = Some(store.revision());
        Ok(())
    }

    /// Translate an event emitted by the overlay.
    ///
    /// `request-state` is answered on the next [`OverlayBridge::poll`]. The
    /// other events become actions for the caller to apply.
    pub fn handle_event(
        &mut self,
        name: &str,
        payload: &Value,
    ) -> Result<Option<OverlayAction>, BridgeError> {
        log::debug!("Overlay -> {}", name);
        let action = match name {
            "request-state" => {
                self.full_state_requested = true;
                return Ok(None);
            }
            "stroke-start" => {
                let p: StrokeStartPayload = parse(name, payload)?;
                self.overlay_originated.insert(p.stroke_id.clone());
                OverlayAction::StrokeStart {
                    stroke_id: p.stroke_id,
                    tool: p.tool,
                    color: p.color,
                    point: p.point,
                }
            }
            "stroke-point" => {
                let p: StrokePointPayload = parse(name, payload)?;
                OverlayAction::StrokePoints {
                    stroke_id: p.stroke_id,
                    points: p.points,
                }
            }
            "stroke-complete" => {
                let p: StrokeIdPayload = parse(name, payload)?;
                OverlayAction::StrokeComplete {
                    stroke_id: p.stroke_id,
                }
            }
            "stroke-delete" => {
                let p: StrokeIdPayload = parse(name, payload)?;
                self.forwarded.remove(&p.stroke_id);
                self.overlay_originated.remove(&p.stroke_id);
                OverlayAction::StrokeDelete {
                    stroke_id: p.stroke_id,
                }
            }
            "clear-all" => {
                self.forwarded.clear();
                self.overlay_originated.clear();
                OverlayAction::ClearAll
            }
            other => return Err(BridgeError::UnknownEvent(other.to_string())),
        };
        Ok(Some(action))
    }
}

fn snapshot(store: &AnnotationStore) -> HashMap<String, Forwarded> {
    store
        .render_order()
        .into_iter()
        .map(|s| {
            (
                s.id.clone(),
                Forwarded {
                    points: s.len(),
                    complete: s.is_complete,
                },
            )
        })
        .collect()
}
