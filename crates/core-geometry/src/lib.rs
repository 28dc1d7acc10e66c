//! Zone geometry: maps a capture rectangle and a per-side LED count into an
//! ordered set of polar boundary angles used to bin sampled pixels into
//! zones (§4.B).
//!
//! The boundary walk is a canonical clockwise traversal of the capture
//! rectangle starting at bottom-left: `left -> top -> right -> bottom`. Each
//! side with `k` configured zones contributes exactly `k` boundary points
//! (`t = 0, 1/k, .., (k-1)/k` along the side); a side with zero zones
//! contributes none. This keeps the total boundary-point count exactly equal
//! to the configured zone count `N` regardless of how zones are distributed
//! across sides, and the final explicit closing point (a repeat of the first
//! point, unwrapped by +2pi) brings the list to the documented `N+1` entries.
//! See `DESIGN.md` for why this differs from a naive per-side corner walk.

use std::f64::consts::TAU;
use thiserror::Error;

const SPAN_EPSILON: f64 = 1e-3;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("zone counts sum to zero")]
    NoZones,
    #[error("perspective origin is degenerate: boundary span {0:.6} rad < 2*pi - epsilon")]
    DegenerateOrigin(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZoneCounts {
    pub left: u16,
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
}

impl ZoneCounts {
    pub fn total(&self) -> u32 {
        self.left as u32 + self.top as u32 + self.right as u32 + self.bottom as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Where the polar sampling origin sits, vertically, within the capture
/// rectangle. Horizontally the origin is always the rectangle's center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OriginMode {
    /// Golden-ratio placement biased toward whichever side is unpopulated.
    Auto,
    /// Fraction of rectangle height from the top, clamped to `[0, 1]`.
    Manual(f64),
}

#[derive(Debug, Clone)]
pub struct Geometry {
    pub origin: Point,
    /// `N + 1` points tracing the boundary walk, closing back on the first.
    pub boundary_points: Vec<Point>,
    /// `N + 1` strictly increasing angles (radians) spanning exactly `2*pi`.
    pub boundary_angles: Vec<f64>,
}

impl Geometry {
    pub fn zone_count(&self) -> usize {
        self.boundary_angles.len() - 1
    }

    /// Index of the zone whose angular range contains `theta` (radians, any
    /// representation — it is rotated into range internally).
    pub fn zone_for_angle(&self, theta: f64) -> usize {
        let lower = self.boundary_angles[0];
        let upper = *self.boundary_angles.last().unwrap();
        let mut t = theta;
        while t < lower {
            t += TAU;
        }
        while t >= upper {
            t -= TAU;
        }
        let n = self.zone_count();
        let idx = self.boundary_angles.partition_point(|&a| a <= t);
        idx.saturating_sub(1).min(n - 1)
    }
}

fn lerp(a: Point, b: Point, t: f64) -> Point {
    Point {
        x: a.x + (b.x - a.x) * t,
        y: a.y + (b.y - a.y) * t,
    }
}

fn side_points(count: u16, start: Point, end: Point) -> Vec<Point> {
    (0..count)
        .map(|j| lerp(start, end, j as f64 / count as f64))
        .collect()
}

fn perspective_origin(counts: ZoneCounts, rect: CaptureRect, mode: OriginMode) -> Point {
    let x = rect.x + rect.width / 2.0;
    let y = match mode {
        OriginMode::Manual(frac) => rect.y + frac.clamp(0.0, 1.0) * rect.height,
        OriginMode::Auto => {
            let zero_sides = [counts.left, counts.top, counts.right, counts.bottom]
                .iter()
                .filter(|&&c| c == 0)
                .count();
            let frac = if zero_sides == 1 && counts.top == 0 {
                0.382
            } else if zero_sides == 1 && counts.bottom == 0 {
                0.618
            } else {
                0.5
            };
            rect.y + frac * rect.height
        }
    };
    Point { x, y }
}

/// Build zone geometry from per-side LED counts, a capture rectangle, and an
/// origin placement strategy.
pub fn build(
    counts: ZoneCounts,
    rect: CaptureRect,
    origin_mode: OriginMode,
) -> Result<Geometry, GeometryError> {
    if counts.total() == 0 {
        return Err(GeometryError::NoZones);
    }

    let bottom_left = Point {
        x: rect.x,
        y: rect.y + rect.height,
    };
    let top_left = Point {
        x: rect.x,
        y: rect.y,
    };
    let top_right = Point {
        x: rect.x + rect.width,
        y: rect.y,
    };
    let bottom_right = Point {
        x: rect.x + rect.width,
        y: rect.y + rect.height,
    };

    let mut points = Vec::with_capacity(counts.total() as usize + 1);
    points.extend(side_points(counts.left, bottom_left, top_left));
    points.extend(side_points(counts.top, top_left, top_right));
    points.extend(side_points(counts.right, top_right, bottom_right));
    points.extend(side_points(counts.bottom, bottom_right, bottom_left));
    let first = points[0];
    points.push(first);

    let origin = perspective_origin(counts, rect, origin_mode);

    let mut angles: Vec<f64> = points
        .iter()
        .map(|p| (p.y - origin.y).atan2(p.x - origin.x))
        .collect();
    for i in 1..angles.len() {
        while angles[i] <= angles[i - 1] {
            angles[i] += TAU;
        }
    }

    let span = angles[angles.len() - 1] - angles[0];
    if span < TAU - SPAN_EPSILON {
        return Err(GeometryError::DegenerateOrigin(span));
    }

    tracing::debug!(
        target: "geometry",
        zones = counts.total(),
        span,
        "built zone geometry"
    );

    Ok(Geometry {
        origin,
        boundary_points: points,
        boundary_angles: angles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect() -> CaptureRect {
        CaptureRect {
            x: 0.0,
            y: 0.0,
            width: 1920.0,
            height: 1080.0,
        }
    }

    #[test]
    fn closure_full_rectangle() {
        let counts = ZoneCounts {
            left: 10,
            top: 20,
            right: 10,
            bottom: 20,
        };
        let geo = build(counts, rect(), OriginMode::Auto).unwrap();
        assert_eq!(geo.zone_count(), 60);
        assert_eq!(geo.boundary_angles.len(), 61);
        let span = geo.boundary_angles[60] - geo.boundary_angles[0];
        assert!((span - TAU).abs() < 1e-6, "span was {span}");
        for w in geo.boundary_angles.windows(2) {
            assert!(w[1] > w[0]);
        }
    }

    #[test]
    fn zero_count_sides_still_close_the_loop() {
        let counts = ZoneCounts {
            left: 0,
            top: 2,
            right: 0,
            bottom: 0,
        };
        let geo = build(counts, rect(), OriginMode::Auto).unwrap();
        assert_eq!(geo.zone_count(), 2);
        let span = geo.boundary_angles[2] - geo.boundary_angles[0];
        assert!((span - TAU).abs() < 1e-6, "span was {span}");
    }

    #[test]
    fn rejects_zero_total_zones() {
        let counts = ZoneCounts::default();
        let err = build(counts, rect(), OriginMode::Auto).unwrap_err();
        assert!(matches!(err, GeometryError::NoZones));
    }

    #[test]
    fn auto_origin_biases_toward_empty_top() {
        let counts = ZoneCounts {
            left: 10,
            top: 0,
            right: 10,
            bottom: 10,
        };
        let geo = build(counts, rect(), OriginMode::Auto).unwrap();
        assert!((geo.origin.y - 1080.0 * 0.382).abs() < 1e-9);
    }

    #[test]
    fn auto_origin_biases_toward_empty_bottom() {
        let counts = ZoneCounts {
            left: 10,
            top: 10,
            right: 10,
            bottom: 0,
        };
        let geo = build(counts, rect(), OriginMode::Auto).unwrap();
        assert!((geo.origin.y - 1080.0 * 0.618).abs() < 1e-9);
    }

    #[test]
    fn manual_origin_is_clamped() {
        let counts = ZoneCounts {
            left: 1,
            top: 1,
            right: 1,
            bottom: 1,
        };
        let geo = build(counts, rect(), OriginMode::Manual(1.5)).unwrap();
        assert!((geo.origin.y - 1080.0).abs() < 1e-9);
    }

    #[test]
    fn zone_for_angle_wraps_and_clamps_to_last_zone() {
        let counts = ZoneCounts {
            left: 10,
            top: 10,
            right: 10,
            bottom: 10,
        };
        let geo = build(counts, rect(), OriginMode::Auto).unwrap();
        let lower = geo.boundary_angles[0];
        assert_eq!(geo.zone_for_angle(lower), 0);
        assert_eq!(geo.zone_for_angle(lower - 1e-9), geo.zone_count() - 1);
    }
}
