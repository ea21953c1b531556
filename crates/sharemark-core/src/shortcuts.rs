//! Keyboard shortcut registry for annotation tools.

use crate::tools::ToolKind;

/// What a shortcut does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutAction {
    SelectTool(ToolKind),
    ClearMine,
    ClearAll,
}

/// A keyboard shortcut definition.
#[derive(Debug, Clone)]
pub struct Shortcut {
    pub key: &'static str,
    pub ctrl: bool,
    pub shift: bool,
    pub action: ShortcutAction,
    pub description: &'static str,
}

impl Shortcut {
    pub const fn new(
        key: &'static str,
        ctrl: bool,
        shift: bool,
        action: ShortcutAction,
        description: &'static str,
    ) -> Self {
        Self {
            key,
            ctrl,
            shift,
            action,
            description,
        }
    }

    /// Format the shortcut for display (e.g., "Ctrl+Shift+X").
    pub fn format(&self) -> String {
        let mut parts = Vec::new();
        if self.ctrl {
            parts.push("Ctrl");
        }
        if self.shift {
            parts.push("Shift");
        }
        parts.push(self.key);
        parts.join("+")
    }
}

/// Registry of all keyboard shortcuts.
pub struct ShortcutRegistry;

impl ShortcutRegistry {
    /// Get all registered shortcuts.
    pub fn all() -> Vec<Shortcut> {
        use ShortcutAction::*;
        vec![
            Shortcut::new("V", false, false, SelectTool(ToolKind::Select), "Select (stop drawing)"),
            Shortcut::new("P", false, false, SelectTool(ToolKind::Pen), "Pen"),
            Shortcut::new("H", false, false, SelectTool(ToolKind::Highlighter), "Highlighter"),
            Shortcut::new("E", false, false, SelectTool(ToolKind::Eraser), "Eraser"),
            Shortcut::new("Escape", false, false, SelectTool(ToolKind::Select), "Back to select"),
            Shortcut::new("X", true, false, ClearMine, "Clear my annotations"),
            Shortcut::new("X", true, true, ClearAll, "Clear all annotations (host)"),
        ]
    }

    /// Resolve a key press. Letter keys match case-insensitively.
    pub fn resolve(key: &str, ctrl: bool, shift: bool) -> Option<ShortcutAction> {
        Self::all()
            .into_iter()
            .find(|s| s.key.eq_ignore_ascii_case(key) && s.ctrl == ctrl && s.shift == shift)
            .map(|s| s.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_tools() {
        assert_eq!(
            ShortcutRegistry::resolve("p", false, false),
            Some(ShortcutAction::SelectTool(ToolKind::Pen))
        );
        assert_eq!(
            ShortcutRegistry::resolve("Escape", false, false),
            Some(ShortcutAction::SelectTool(ToolKind::Select))
        );
        assert_eq!(ShortcutRegistry::resolve("Q", false, false), None);
    }

    #[test]
    fn test_modifiers_disambiguate() {
        assert_eq!(ShortcutRegistry::resolve("X", true, false), Some(ShortcutAction::ClearMine));
        assert_eq!(ShortcutRegistry::resolve("x", true, true), Some(ShortcutAction::ClearAll));
        assert_eq!(ShortcutRegistry::resolve("X", false, false), None);
    }

    #[test]
    fn test_format() {
        let clear = ShortcutRegistry::all()
            .into_iter()
            .find(|s| s.action == ShortcutAction::ClearAll)
            .unwrap();
        assert_eq!(clear.format(), "Ctrl+Shift+X");
    }
}
