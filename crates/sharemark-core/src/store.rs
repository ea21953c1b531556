//! Authoritative in-memory annotation state.
//!
//! The store trusts its callers: ownership and role checks happen before a
//! mutation reaches it (see [`crate::permissions`]).

use crate::stroke::{Point, Stroke};
use std::collections::HashMap;

/// All annotation state for one client.
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
    /// Completed strokes, back to front.
    strokes: Vec<Stroke>,
    /// The locally-authored stroke currently being drawn.
    active_stroke: Option<Stroke>,
    /// In-progress strokes from other participants, keyed by stroke id.
    remote_active_strokes: HashMap<String, Stroke>,
    /// Bumped on every observable mutation.
    revision: u64,
}

impl AnnotationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Mutation counter, for cheap change detection.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // --- Completed strokes ---

    /// Append a completed stroke on top. Ids already present are ignored.
    /// Returns true if the stroke was inserted.
    pub fn add_stroke(&mut self, mut stroke: Stroke) -> bool {
        if self.strokes.iter().any(|s| s.id == stroke.id) {
            return false;
        }
        stroke.complete();
        self.strokes.push(stroke);
        self.bump();
        true
    }

    /// Remove a stroke wherever it lives.
    pub fn delete_stroke(&mut self, id: &str) -> Option<Stroke> {
        let removed = if let Some(pos) = self.strokes.iter().position(|s| s.id == id) {
            Some(self.strokes.remove(pos))
        } else if let Some(stroke) = self.remote_active_strokes.remove(id) {
            Some(stroke)
        } else if self.active_stroke.as_ref().is_some_and(|s| s.id == id) {
            self.active_stroke.take()
        } else {
            None
        };

        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Empty completed, local active and remote active strokes together.
    pub fn clear_all(&mut self) {
        self.strokes.clear();
        self.active_stroke = None;
        self.remote_active_strokes.clear();
        self.bump();
    }

    /// Remove every stroke authored by `participant_id`, in any state.
    /// Returns the number of strokes removed.
    pub fn clear_by_participant(&mut self, participant_id: &str) -> usize {
        let before = self.len_all();
        self.strokes.retain(|s| s.participant_id != participant_id);
        self.remote_active_strokes
            .retain(|_, s| s.participant_id != participant_id);
        if self
            .active_stroke
            .as_ref()
            .is_some_and(|s| s.participant_id == participant_id)
        {
            self.active_stroke = None;
        }
        let removed = before - self.len_all();
        if removed > 0 {
            self.bump();
        }
        removed
    }

    /// Replace the completed strokes wholesale (late-joiner sync).
    /// Incomplete strokes in `strokes` are dropped.
    pub fn set_strokes(&mut self, strokes: Vec<Stroke>) {
        self.strokes = strokes.into_iter().filter(|s| s.is_complete).collect();
        self.bump();
    }

    // --- Local in-progress stroke ---

    /// Replace the local in-progress stroke.
    pub fn set_active_stroke(&mut self, stroke: Option<Stroke>) {
        self.active_stroke = stroke;
        self.bump();
    }

    /// Append points to the in-progress stroke with `id`, local or remote.
    /// Returns false when no in-progress stroke has that id.
    pub fn update_stroke(&mut self, id: &str, points: &[Point]) -> bool {
        let target = match self.active_stroke.as_mut() {
            Some(active) if active.id == id => Some(active),
            _ => self.remote_active_strokes.get_mut(id),
        };
        match target {
            Some(stroke) => {
                stroke.add_points(points);
                self.bump();
                true
            }
            None => false,
        }
    }

    /// Commit the local active stroke with `id` into the completed list.
    pub fn complete_stroke(&mut self, id: &str) -> Option<Stroke> {
        if !self.active_stroke.as_ref().is_some_and(|s| s.id == id) {
            return None;
        }
        let mut stroke = self.active_stroke.take()?;
        stroke.complete();
        self.strokes.push(stroke.clone());
        self.bump();
        Some(stroke)
    }

    // --- Remote in-progress strokes ---

    /// Track a stroke another participant has started drawing.
    pub fn add_remote_active_stroke(&mut self, stroke: Stroke) {
        self.remote_active_strokes.insert(stroke.id.clone(), stroke);
        self.bump();
    }

    /// Append points to a remote in-progress stroke.
    pub fn update_remote_active_stroke(&mut self, id: &str, points: &[Point]) -> bool {
        match self.remote_active_strokes.get_mut(id) {
            Some(stroke) => {
                stroke.add_points(points);
                self.bump();
                true
            }
            None => false,
        }
    }

    /// Move a remote stroke into the completed list.
    ///
    /// `final_stroke` wins over the tracked in-progress copy when given, so
    /// a peer that missed some updates still converges. A final copy from a
    /// different author than the tracked one is refused.
    pub fn complete_remote_active_stroke(
        &mut self,
        id: &str,
        final_stroke: Option<Stroke>,
    ) -> bool {
        if let (Some(tracked), Some(final_stroke)) =
            (self.remote_active_strokes.get(id), final_stroke.as_ref())
        {
            if tracked.participant_id != final_stroke.participant_id {
                return false;
            }
        }
        let tracked = self.remote_active_strokes.remove(id);
        let Some(stroke) = final_stroke.or(tracked) else {
            return false;
        };
        let inserted = self.add_stroke(stroke);
        if !inserted {
            // Already complete; still count the removal from the active map.
            self.bump();
        }
        true
    }

    /// Drop in-progress strokes of a participant who left mid-stroke.
    pub fn discard_remote_active_by_participant(&mut self, participant_id: &str) -> usize {
        let before = self.remote_active_strokes.len();
        self.remote_active_strokes
            .retain(|_, s| s.participant_id != participant_id);
        let removed = before - self.remote_active_strokes.len();
        if removed > 0 {
            self.bump();
        }
        removed
    }

    // --- Queries ---

    /// Completed strokes, back to front.
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn active_stroke(&self) -> Option<&Stroke> {
        self.active_stroke.as_ref()
    }

    pub fn remote_active_strokes(&self) -> &HashMap<String, Stroke> {
        &self.remote_active_strokes
    }

    /// Look up a stroke by id in any collection.
    pub fn get(&self, id: &str) -> Option<&Stroke> {
        self.strokes
            .iter()
            .find(|s| s.id == id)
            .or_else(|| self.remote_active_strokes.get(id))
            .or_else(|| self.active_stroke.as_ref().filter(|s| s.id == id))
    }

    /// Clone of the completed strokes, for snapshots.
    pub fn completed_snapshot(&self) -> Vec<Stroke> {
        self.strokes.clone()
    }

    /// Remote in-progress strokes ordered by `(created_at, id)`.
    fn remote_ordered(&self) -> Vec<&Stroke> {
        let mut remote: Vec<&Stroke> = self.remote_active_strokes.values().collect();
        remote.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        remote
    }

    /// In-progress strokes: remote ones first, the local one last.
    pub fn in_progress(&self) -> Vec<&Stroke> {
        let mut strokes = self.remote_ordered();
        strokes.extend(self.active_stroke.as_ref());
        strokes
    }

    /// Everything to draw, back to front: completed, then remote in-progress,
    /// then the local active stroke so local feedback is never occluded.
    pub fn render_order(&self) -> Vec<&Stroke> {
        let mut all: Vec<&Stroke> = self.strokes.iter().collect();
        all.extend(self.in_progress());
        all
    }

    /// Number of completed strokes.
    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    /// True when there is nothing at all to draw.
    pub fn is_empty(&self) -> bool {
        self.len_all() == 0
    }

    fn len_all(&self) -> usize {
        self.strokes.len()
            + self.remote_active_strokes.len()
            + usize::from(self.active_stroke.is_some())
    }
}
