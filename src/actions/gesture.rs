//! Swipe trajectories.

use std::f64::consts::PI;

use crate::actuator::PixelPoint;

/// Number of samples on a curved swipe path.
pub const HUMANIZED_PATH_POINTS: usize = 24;

/// Sideways bulge of a curved swipe, relative to its length.
const CURVE_BULGE: f64 = 0.08;

const MIN_SWIPE_MS: u64 = 1000;
const MAX_SWIPE_MS: u64 = 2000;

/// Gesture duration derived from the swipe length.
pub fn swipe_duration_ms(start: PixelPoint, end: PixelPoint) -> u64 {
    let dx = (start.x - end.x) as i64;
    let dy = (start.y - end.y) as i64;
    let dist_sq = (dx * dx + dy * dy) as u64;
    (dist_sq / 1000).clamp(MIN_SWIPE_MS, MAX_SWIPE_MS)
}

/// Build the point list for a swipe between two endpoints.
pub fn build_swipe_path(start: PixelPoint, end: PixelPoint, humanized: bool) -> Vec<PixelPoint> {
    if humanized {
        humanized_path(start, end, HUMANIZED_PATH_POINTS)
    } else {
        vec![start, end]
    }
}

/// A gently curved path with ease-in/ease-out spacing, like a finger flick.
///
/// The curve is a quadratic Bézier whose control point sits beside the
/// midpoint of the straight line. Endpoints are kept exact.
pub fn humanized_path(start: PixelPoint, end: PixelPoint, samples: usize) -> Vec<PixelPoint> {
    let samples = samples.max(2);
    let (sx, sy) = (start.x as f64, start.y as f64);
    let (ex, ey) = (end.x as f64, end.y as f64);
    let (dx, dy) = (ex - sx, ey - sy);

    // Perpendicular offset scaled to the swipe length.
    let (cx, cy) = (
        (sx + ex) / 2.0 - dy * CURVE_BULGE,
        (sy + ey) / 2.0 + dx * CURVE_BULGE,
    );

    (0..samples)
        .map(|i| {
            let linear = i as f64 / (samples - 1) as f64;
            let t = (1.0 - (PI * linear).cos()) / 2.0;
            let u = 1.0 - t;
            let x = u * u * sx + 2.0 * u * t * cx + t * t * ex;
            let y = u * u * sy + 2.0 * u * t * cy + t * t * ey;
            PixelPoint::new(x.round() as i32, y.round() as i32)
        })
        .collect()
}
