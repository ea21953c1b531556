//! Tool state machine turning pointer input into store mutations.

use crate::geometry::{DEFAULT_HIT_THRESHOLD, find_topmost_stroke_at_point};
use crate::permissions::{PermissionError, Permissions};
use crate::store::AnnotationStore;
use crate::stroke::{PALETTE, Point, Stroke, StrokeTool};
use serde::{Deserialize, Serialize};

/// Available tools. Purely local UI state, never sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    #[default]
    Select,
    Pen,
    Highlighter,
    Eraser,
}

impl ToolKind {
    /// The stroke tool this UI tool draws with, if it draws at all.
    pub fn stroke_tool(self) -> Option<StrokeTool> {
        match self {
            ToolKind::Pen => Some(StrokeTool::Pen),
            ToolKind::Highlighter => Some(StrokeTool::Highlighter),
            ToolKind::Select | ToolKind::Eraser => None,
        }
    }
}

/// A local mutation that other participants need to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalChange {
    /// Stroke metadata with only the newly appended points.
    StrokeUpdated(Stroke),
    /// The committed stroke, with all of its points.
    StrokeCompleted(Stroke),
    StrokeDeleted(String),
    Cleared,
    ClearedParticipant(String),
}

/// Copy of `stroke` carrying only the points from `from` onwards.
pub(crate) fn stroke_delta(stroke: &Stroke, from: usize) -> Stroke {
    Stroke {
        id: stroke.id.clone(),
        participant_id: stroke.participant_id.clone(),
        tool: stroke.tool,
        color: stroke.color.clone(),
        points: stroke.points.get(from..).map(<[Point]>::to_vec).unwrap_or_default(),
        created_at: stroke.created_at,
        is_complete: stroke.is_complete,
    }
}

/// Drives the active tool for the local participant.
#[derive(Debug, Clone)]
pub struct DrawingController {
    participant_id: String,
    tool: ToolKind,
    color: String,
    hit_threshold: f64,
    /// Stroke under the eraser, for hover highlight.
    hovered_stroke_id: Option<String>,
}

impl DrawingController {
    /// Create a controller for the local participant.
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            tool: ToolKind::default(),
            color: PALETTE[0].to_string(),
            hit_threshold: DEFAULT_HIT_THRESHOLD,
            hovered_stroke_id: None,
        }
    }

    pub fn with_hit_threshold(mut self, threshold: f64) -> Self {
        self.hit_threshold = threshold;
        self
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn tool(&self) -> ToolKind {
        self.tool
    }

    /// Switch tools. Every transition is legal.
    pub fn set_tool(&mut self, tool: ToolKind) {
        if tool != ToolKind::Eraser {
            self.hovered_stroke_id = None;
        }
        self.tool = tool;
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn set_color(&mut self, color: impl Into<String>) {
        self.color = color.into();
    }

    pub fn hit_threshold(&self) -> f64 {
        self.hit_threshold
    }

    pub fn hovered_stroke_id(&self) -> Option<&str> {
        self.hovered_stroke_id.as_deref()
    }

    /// Pointer pressed at `point`.
    pub fn pointer_down(
        &mut self,
        point: Point,
        store: &mut AnnotationStore,
        permissions: &Permissions,
    ) -> Result<Option<LocalChange>, PermissionError> {
        let point = point.clamped();
        match self.tool {
            ToolKind::Pen | ToolKind::Highlighter => {
                permissions.check_draw(&self.participant_id)?;
                if store.active_stroke().is_some() {
                    return Ok(None);
                }
                let Some(tool) = self.tool.stroke_tool() else {
                    return Ok(None);
                };
                let stroke = Stroke::begin(&self.participant_id, tool, &self.color, point);
                log::debug!("Started stroke {}", stroke.id);
                store.set_active_stroke(Some(stroke.clone()));
                Ok(Some(LocalChange::StrokeUpdated(stroke)))
            }
            ToolKind::Eraser => {
                let Some(id) =
                    find_topmost_stroke_at_point(&point, store.strokes(), self.hit_threshold)
                        .map(|s| s.id.clone())
                else {
                    return Ok(None);
                };
                self.delete_stroke(&id, store, permissions)
            }
            ToolKind::Select => Ok(None),
        }
    }

    /// Pointer moved to `point`.
    pub fn pointer_move(
        &mut self,
        point: Point,
        store: &mut AnnotationStore,
    ) -> Option<LocalChange> {
        let point = point.clamped();

        if let Some(active) = store.active_stroke() {
            let id = active.id.clone();
            let from = active.len();
            store.update_stroke(&id, &[point]);
            return store
                .active_stroke()
                .map(|s| LocalChange::StrokeUpdated(stroke_delta(s, from)));
        }

        if self.tool == ToolKind::Eraser {
            self.hovered_stroke_id =
                find_topmost_stroke_at_point(&point, store.strokes(), self.hit_threshold)
                    .map(|s| s.id.clone());
        }
        None
    }

    /// Pointer released: the active stroke is always committed.
    pub fn pointer_up(&mut self, store: &mut AnnotationStore) -> Option<LocalChange> {
        let id = store.active_stroke()?.id.clone();
        let stroke = store.complete_stroke(&id)?;
        log::debug!("Committed stroke {} ({} points)", stroke.id, stroke.len());
        Some(LocalChange::StrokeCompleted(stroke))
    }

    /// Pointer left the surface. Commits like pointer-up; there is no cancel.
    pub fn pointer_leave(&mut self, store: &mut AnnotationStore) -> Option<LocalChange> {
        self.hovered_stroke_id = None;
        self.pointer_up(store)
    }

    /// Delete a completed stroke on behalf of the local participant.
    pub fn delete_stroke(
        &mut self,
        id: &str,
        store: &mut AnnotationStore,
        permissions: &Permissions,
    ) -> Result<Option<LocalChange>, PermissionError> {
        let Some(stroke) = store.get(id) else {
            return Ok(None);
        };
        permissions.check_delete(&self.participant_id, stroke)?;
        store.delete_stroke(id);
        if self.hovered_stroke_id.as_deref() == Some(id) {
            self.hovered_stroke_id = None;
        }
        Ok(Some(LocalChange::StrokeDeleted(id.to_string())))
    }

    /// Clear everything (host only).
    pub fn clear_all(
        &mut self,
        store: &mut AnnotationStore,
        permissions: &Permissions,
    ) -> Result<LocalChange, PermissionError> {
        permissions.check_clear_all(&self.participant_id)?;
        store.clear_all();
        self.hovered_stroke_id = None;
        Ok(LocalChange::Cleared)
    }

    /// Clear the local participant's own strokes.
    pub fn clear_mine(
        &mut self,
        store: &mut AnnotationStore,
        permissions: &Permissions,
    ) -> Result<LocalChange, PermissionError> {
        permissions.check_clear_participant(&self.participant_id, &self.participant_id)?;
        store.clear_by_participant(&self.participant_id);
        self.hovered_stroke_id = None;
        Ok(LocalChange::ClearedParticipant(self.participant_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::ParticipantRole;

    fn setup(tool: ToolKind) -> (DrawingController, AnnotationStore, Permissions) {
        let mut controller = DrawingController::new("me");
        controller.set_tool(tool);
        (controller, AnnotationStore::new(), Permissions::new())
    }

    fn foreign_stroke(store: &mut AnnotationStore, id: &str, author: &str) {
        let mut s = Stroke::with_id(
            id.to_string(),
            author,
            StrokeTool::Pen,
            "#000000",
            Point::new(0.2, 0.5),
        );
        s.add_points(&[Point::new(0.8, 0.5)]);
        store.add_stroke(s);
    }

    #[test]
    fn test_tool_selection() {
        let mut controller = DrawingController::new("me");
        assert_eq!(controller.tool(), ToolKind::Select);
        for tool in [ToolKind::Eraser, ToolKind::Pen, ToolKind::Select, ToolKind::Highlighter] {
            controller.set_tool(tool);
            assert_eq!(controller.tool(), tool);
        }
    }

    #[test]
    fn test_pen_draws_and_commits() {
        let (mut c, mut store, perms) = setup(ToolKind::Pen);

        let start = c.pointer_down(Point::new(0.1, 0.1), &mut store, &perms).unwrap();
        assert!(matches!(start, Some(LocalChange::StrokeUpdated(ref s)) if s.len() == 1));

        let moved = c.pointer_move(Point::new(0.2, 0.2), &mut store);
        match moved {
            Some(LocalChange::StrokeUpdated(delta)) => {
                assert_eq!(delta.points, vec![Point::new(0.2, 0.2)]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let done = c.pointer_up(&mut store);
        match done {
            Some(LocalChange::StrokeCompleted(s)) => {
                assert_eq!(s.len(), 2);
                assert!(s.is_complete);
                assert_eq!(s.participant_id, "me");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.len(), 1);
        assert!(store.active_stroke().is_none());
    }

    #[test]
    fn test_highlighter_tool_recorded() {
        let (mut c, mut store, perms) = setup(ToolKind::Highlighter);
        c.set_color("#FFC157");
        c.pointer_down(Point::new(0.3, 0.3), &mut store, &perms).unwrap();
        let active = store.active_stroke().unwrap();
        assert_eq!(active.tool, StrokeTool::Highlighter);
        assert_eq!(active.color, "#FFC157");
    }

    #[test]
    fn test_second_pointer_down_is_noop() {
        let (mut c, mut store, perms) = setup(ToolKind::Pen);
        c.pointer_down(Point::new(0.1, 0.1), &mut store, &perms).unwrap();
        let id = store.active_stroke().unwrap().id.clone();
        let again = c.pointer_down(Point::new(0.9, 0.9), &mut store, &perms).unwrap();
        assert!(again.is_none());
        assert_eq!(store.active_stroke().unwrap().id, id);
        assert_eq!(store.active_stroke().unwrap().len(), 1);
    }

    #[test]
    fn test_single_point_stroke_commits_on_leave() {
        let (mut c, mut store, perms) = setup(ToolKind::Pen);
        c.pointer_down(Point::new(0.5, 0.5), &mut store, &perms).unwrap();
        let done = c.pointer_leave(&mut store);
        assert!(matches!(done, Some(LocalChange::StrokeCompleted(ref s)) if s.len() == 1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_points_are_clamped() {
        let (mut c, mut store, perms) = setup(ToolKind::Pen);
        c.pointer_down(Point::new(-0.2, 1.4), &mut store, &perms).unwrap();
        assert_eq!(store.active_stroke().unwrap().points[0], Point::new(0.0, 1.0));
    }

    #[test]
    fn test_select_does_nothing() {
        let (mut c, mut store, perms) = setup(ToolKind::Select);
        assert!(c.pointer_down(Point::new(0.5, 0.5), &mut store, &perms).unwrap().is_none());
        assert!(c.pointer_move(Point::new(0.6, 0.6), &mut store).is_none());
        assert!(c.pointer_up(&mut store).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_viewer_cannot_start_stroke() {
        let (mut c, mut store, mut perms) = setup(ToolKind::Pen);
        perms.set_role("me", ParticipantRole::Viewer);
        assert!(c.pointer_down(Point::new(0.5, 0.5), &mut store, &perms).is_err());
        assert!(store.active_stroke().is_none());
    }

    #[test]
    fn test_eraser_click_scenario() {
        let (mut c, mut store, perms) = setup(ToolKind::Eraser);
        foreign_stroke(&mut store, "line", "me");

        let miss = c.pointer_down(Point::new(0.5, 0.8), &mut store, &perms).unwrap();
        assert!(miss.is_none());
        assert_eq!(store.len(), 1);

        let hit = c.pointer_down(Point::new(0.5, 0.51), &mut store, &perms).unwrap();
        assert_eq!(hit, Some(LocalChange::StrokeDeleted("line".to_string())));
        assert!(store.is_empty());
    }

    #[test]
    fn test_eraser_deletes_topmost_only() {
        let (mut c, mut store, mut perms) = setup(ToolKind::Eraser);
        perms.set_role("me", ParticipantRole::Host);
        foreign_stroke(&mut store, "bottom", "p1");
        foreign_stroke(&mut store, "top", "p2");

        c.pointer_down(Point::new(0.5, 0.5), &mut store, &perms).unwrap();
        let ids: Vec<_> = store.strokes().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["bottom"]);
    }

    #[test]
    fn test_eraser_rejects_foreign_stroke() {
        let (mut c, mut store, perms) = setup(ToolKind::Eraser);
        foreign_stroke(&mut store, "theirs", "p2");
        let result = c.pointer_down(Point::new(0.5, 0.5), &mut store, &perms);
        assert!(matches!(result, Err(PermissionError::NotOwner { .. })));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_eraser_hover() {
        let (mut c, mut store, _) = setup(ToolKind::Eraser);
        foreign_stroke(&mut store, "line", "p2");

        assert!(c.pointer_move(Point::new(0.5, 0.505), &mut store).is_none());
        assert_eq!(c.hovered_stroke_id(), Some("line"));
        assert_eq!(store.len(), 1);

        c.pointer_move(Point::new(0.5, 0.9), &mut store);
        assert_eq!(c.hovered_stroke_id(), None);

        c.pointer_move(Point::new(0.5, 0.5), &mut store);
        c.pointer_leave(&mut store);
        assert_eq!(c.hovered_stroke_id(), None);
    }

    #[test]
    fn test_leaving_eraser_clears_hover() {
        let (mut c, mut store, _) = setup(ToolKind::Eraser);
        foreign_stroke(&mut store, "line", "p2");
        c.pointer_move(Point::new(0.5, 0.5), &mut store);
        c.set_tool(ToolKind::Pen);
        assert_eq!(c.hovered_stroke_id(), None);
    }

    #[test]
    fn test_clear_all_requires_host() {
        let (mut c, mut store, mut perms) = setup(ToolKind::Pen);
        foreign_stroke(&mut store, "line", "p2");
        assert!(c.clear_all(&mut store, &perms).is_err());
        assert_eq!(store.len(), 1);

        perms.set_role("me", ParticipantRole::Host);
        assert_eq!(c.clear_all(&mut store, &perms), Ok(LocalChange::Cleared));
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear_mine() {
        let (mut c, mut store, perms) = setup(ToolKind::Pen);
        foreign_stroke(&mut store, "mine", "me");
        foreign_stroke(&mut store, "theirs", "p2");
        assert_eq!(
            c.clear_mine(&mut store, &perms),
            Ok(LocalChange::ClearedParticipant("me".to_string()))
        );
        assert!(store.get("mine").is_none());
        assert!(store.get("theirs").is_some());
    }
}
