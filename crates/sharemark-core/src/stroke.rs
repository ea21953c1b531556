//! Stroke data model.
//!
//! Points are stored normalized to `[0, 1]` relative to the logical size of
//! the shared content, so strokes look the same on every viewer regardless of
//! resolution or DPI.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Default display colours handed out to participants.
pub const PALETTE: [&str; 6] = [
    "#FF5757", "#57A6FF", "#57FF90", "#FFC157", "#C857FF", "#FF57C8",
];

/// Pick a palette colour for the participant at `index` (wraps around).
pub fn participant_color(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

/// A normalized point on the shared content.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    /// Pen pressure in `[0, 1]`, when the input device reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y, pressure: None }
    }

    pub const fn with_pressure(x: f64, y: f64, pressure: f64) -> Self {
        Self {
            x,
            y,
            pressure: Some(pressure),
        }
    }

    /// Clamp coordinates (and pressure) into the unit square.
    ///
    /// NaN coordinates collapse to 0 so a bad sample cannot poison the
    /// bounding box of a stroke.
    pub fn clamped(self) -> Self {
        fn unit(v: f64) -> f64 {
            if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
        }
        Self {
            x: unit(self.x),
            y: unit(self.y),
            pressure: self.pressure.map(unit),
        }
    }

    /// Euclidean distance to another point (pressure ignored).
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<Point> for kurbo::Point {
    fn from(p: Point) -> Self {
        kurbo::Point::new(p.x, p.y)
    }
}

/// Convert logical pixel coordinates into a normalized point.
///
/// The result is not clamped; callers feeding it to the drawing controller
/// get clamping there.
pub fn normalize(px: f64, py: f64, width: f64, height: f64) -> Point {
    Point::new(px / width, py / height)
}

/// Convert a normalized point back to logical pixel coordinates.
pub fn denormalize(point: &Point, width: f64, height: f64) -> (f64, f64) {
    (point.x * width, point.y * height)
}

/// Express a pixel tolerance in normalized units, using the larger dimension.
pub fn threshold_from_pixels(pixels: f64, width: f64, height: f64) -> f64 {
    let extent = width.max(height);
    if extent <= 0.0 { 0.0 } else { pixels / extent }
}

/// Drawing tool that produced a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrokeTool {
    Pen,
    Highlighter,
}

/// One continuous freehand annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub id: String,
    pub participant_id: String,
    pub tool: StrokeTool,
    /// Hex colour string, e.g. `#FF5757`.
    pub color: String,
    pub points: Vec<Point>,
    /// Creation time in epoch milliseconds.
    pub created_at: u64,
    pub is_complete: bool,
}

impl Stroke {
    /// Start a new in-progress stroke with a fresh id.
    pub fn begin(participant_id: &str, tool: StrokeTool, color: &str, start: Point) -> Self {
        Self::with_id(
            Uuid::new_v4().to_string(),
            participant_id,
            tool,
            color,
            start,
        )
    }

    /// Start a new in-progress stroke with a caller-supplied id.
    pub fn with_id(
        id: String,
        participant_id: &str,
        tool: StrokeTool,
        color: &str,
        start: Point,
    ) -> Self {
        Self {
            id,
            participant_id: participant_id.to_string(),
            tool,
            color: color.to_string(),
            points: vec![start],
            created_at: now_millis(),
            is_complete: false,
        }
    }

    /// Append points. Completed strokes are immutable and ignore this.
    pub fn add_points(&mut self, points: &[Point]) {
        if !self.is_complete {
            self.points.extend_from_slice(points);
        }
    }

    /// Mark the stroke as complete.
    pub fn complete(&mut self) {
        self.is_complete = true;
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
