//! Who may draw, erase and clear.
//!
//! Roles are assigned by the room layer; this module only answers questions
//! about them.

use crate::stroke::Stroke;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Role of a participant in the meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Host,
    #[default]
    Annotator,
    Viewer,
}

/// An annotation action was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("annotations are disabled for this session")]
    AnnotationsDisabled,
    #[error("participant {0} is a viewer and cannot annotate")]
    Viewer(String),
    #[error("participant {participant} does not own stroke {stroke}")]
    NotOwner { participant: String, stroke: String },
    #[error("participant {0} is not the host")]
    NotHost(String),
}

/// Role registry plus the session-wide annotation switch.
#[derive(Debug, Clone)]
pub struct Permissions {
    roles: HashMap<String, ParticipantRole>,
    annotations_enabled: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            roles: HashMap::new(),
            annotations_enabled: true,
        }
    }
}

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or change) a participant's role.
    pub fn set_role(&mut self, participant_id: &str, role: ParticipantRole) {
        self.roles.insert(participant_id.to_string(), role);
    }

    /// Forget a participant who left.
    pub fn remove(&mut self, participant_id: &str) {
        self.roles.remove(participant_id);
    }

    /// Role of a participant; unknown participants are annotators.
    pub fn role(&self, participant_id: &str) -> ParticipantRole {
        self.roles.get(participant_id).copied().unwrap_or_default()
    }

    pub fn is_host(&self, participant_id: &str) -> bool {
        self.role(participant_id) == ParticipantRole::Host
    }

    pub fn annotations_enabled(&self) -> bool {
        self.annotations_enabled
    }

    /// Host toggle for annotating in this session.
    pub fn set_annotations_enabled(&mut self, enabled: bool) {
        self.annotations_enabled = enabled;
    }

    pub fn check_draw(&self, participant_id: &str) -> Result<(), PermissionError> {
        if !self.annotations_enabled {
            return Err(PermissionError::AnnotationsDisabled);
        }
        if self.role(participant_id) == ParticipantRole::Viewer {
            return Err(PermissionError::Viewer(participant_id.to_string()));
        }
        Ok(())
    }

    /// Authors may delete their own strokes; hosts may delete anything.
    pub fn check_delete(
        &self,
        participant_id: &str,
        stroke: &Stroke,
    ) -> Result<(), PermissionError> {
        if stroke.participant_id == participant_id || self.is_host(participant_id) {
            Ok(())
        } else {
            Err(PermissionError::NotOwner {
                participant: participant_id.to_string(),
                stroke: stroke.id.clone(),
            })
        }
    }

    pub fn check_clear_all(&self, participant_id: &str) -> Result<(), PermissionError> {
        if self.is_host(participant_id) {
            Ok(())
        } else {
            Err(PermissionError::NotHost(participant_id.to_string()))
        }
    }

    pub fn check_clear_participant(
        &self,
        actor: &str,
        target: &str,
    ) -> Result<(), PermissionError> {
        if actor == target || self.is_host(actor) {
            Ok(())
        } else {
            Err(PermissionError::NotHost(actor.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::{Point, StrokeTool};

    fn stroke_by(author: &str) -> Stroke {
        Stroke::with_id("s1".to_string(), author, StrokeTool::Pen, "#FF5757", Point::new(0.1, 0.1))
    }

    #[test]
    fn test_unknown_participant_is_annotator() {
        let perms = Permissions::new();
        assert_eq!(perms.role("stranger"), ParticipantRole::Annotator);
        assert!(perms.check_draw("stranger").is_ok());
    }

    #[test]
    fn test_viewer_cannot_draw() {
        let mut perms = Permissions::new();
        perms.set_role("v", ParticipantRole::Viewer);
        assert_eq!(perms.check_draw("v"), Err(PermissionError::Viewer("v".to_string())));
    }

    #[test]
    fn test_disabled_blocks_everyone() {
        let mut perms = Permissions::new();
        perms.set_role("h", ParticipantRole::Host);
        perms.set_annotations_enabled(false);
        assert_eq!(perms.check_draw("h"), Err(PermissionError::AnnotationsDisabled));
    }

    #[test]
    fn test_delete_owner_or_host() {
        let mut perms = Permissions::new();
        perms.set_role("h", ParticipantRole::Host);
        let stroke = stroke_by("author");
        assert!(perms.check_delete("author", &stroke).is_ok());
        assert!(perms.check_delete("h", &stroke).is_ok());
        assert!(perms.check_delete("other", &stroke).is_err());
    }

    #[test]
    fn test_clear_rules() {
        let mut perms = Permissions::new();
        perms.set_role("h", ParticipantRole::Host);
        assert!(perms.check_clear_all("h").is_ok());
        assert!(perms.check_clear_all("a").is_err());
        assert!(perms.check_clear_participant("a", "a").is_ok());
        assert!(perms.check_clear_participant("h", "a").is_ok());
        assert!(perms.check_clear_participant("a", "b").is_err());
    }
}
