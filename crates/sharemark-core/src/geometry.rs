//! Hit-testing over stroke point arrays.
//!
//! All functions are pure. Degenerate input (empty strokes, zero-length
//! segments) degrades gracefully instead of erroring.

use crate::stroke::{Point, Stroke};
use kurbo::{Rect, Vec2};

/// Default eraser tolerance in normalized units.
pub const DEFAULT_HIT_THRESHOLD: f64 = 0.02;

/// Axis-aligned bounding box of a stroke. Empty strokes yield `Rect::ZERO`.
pub fn stroke_bounds(stroke: &Stroke) -> Rect {
    let mut points = stroke.points.iter();
    let Some(first) = points.next() else {
        return Rect::ZERO;
    };

    let mut min_x = first.x;
    let mut min_y = first.y;
    let mut max_x = first.x;
    let mut max_y = first.y;

    for point in points {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }

    Rect::new(min_x, min_y, max_x, max_y)
}

/// Distance from `p` to the segment `a`–`b`, clamping the projection onto
/// the segment. A degenerate segment reduces to point distance.
pub fn point_to_segment_distance(p: &Point, a: &Point, b: &Point) -> f64 {
    let seg = Vec2::new(b.x - a.x, b.y - a.y);
    let rel = Vec2::new(p.x - a.x, p.y - a.y);

    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return rel.hypot();
    }

    let t = (rel.dot(seg) / len_sq).clamp(0.0, 1.0);
    (rel - seg * t).hypot()
}

/// Whether `p` lies within `threshold` of the stroke's polyline.
pub fn is_point_on_stroke(p: &Point, stroke: &Stroke, threshold: f64) -> bool {
    let points = &stroke.points;
    if points.is_empty() {
        return false;
    }

    // Fast reject. Inclusive on every edge: Rect::contains is half-open.
    let expanded = stroke_bounds(stroke).inflate(threshold, threshold);
    if p.x < expanded.x0 || p.x > expanded.x1 || p.y < expanded.y0 || p.y > expanded.y1 {
        return false;
    }

    if points.len() == 1 {
        return p.distance(&points[0]) <= threshold;
    }

    let min = points
        .windows(2)
        .map(|w| point_to_segment_distance(p, &w[0], &w[1]))
        .fold(f64::INFINITY, f64::min);
    min <= threshold
}

/// All strokes hit by `p`, in input order.
pub fn find_strokes_at_point<'a>(
    p: &Point,
    strokes: &'a [Stroke],
    threshold: f64,
) -> Vec<&'a Stroke> {
    strokes
        .iter()
        .filter(|s| is_point_on_stroke(p, s, threshold))
        .collect()
}

/// The visually topmost (last inserted) stroke hit by `p`.
pub fn find_topmost_stroke_at_point<'a>(
    p: &Point,
    strokes: &'a [Stroke],
    threshold: f64,
) -> Option<&'a Stroke> {
    // Same answer as the last element of find_strokes_at_point, without the Vec.
    strokes.iter().rev().find(|s| is_point_on_stroke(p, s, threshold))
}
