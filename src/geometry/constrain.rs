//! Pan and zoom constraints.

use std::fmt;
use std::str::FromStr;

use super::transform::{sin_cos_degrees, Point};

/// How far the image may be panned away from the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanPolicy {
    /// The image edge may not pass the opposite viewport edge. An image
    /// smaller than the viewport stays centered.
    #[default]
    Strict,

    /// The image center may not leave the viewport.
    Relaxed,

    /// The viewport center may not leave the image.
    Loose,
}

impl FromStr for PanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(PanPolicy::Strict),
            "relaxed" => Ok(PanPolicy::Relaxed),
            "loose" => Ok(PanPolicy::Loose),
            other => Err(format!(
                "unknown pan policy '{}', expected strict, relaxed or loose",
                other
            )),
        }
    }
}

impl fmt::Display for PanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PanPolicy::Strict => "strict",
            PanPolicy::Relaxed => "relaxed",
            PanPolicy::Loose => "loose",
        };
        f.write_str(name)
    }
}

/// Inputs of a pan constraint that do not change between candidate targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanLimits {
    pub image_width: f64,
    pub image_height: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub policy: PanPolicy,
}

/// Result of [`constrain_pan`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanOutcome {
    pub point: Point,
    /// The candidate was moved
    pub constrained: bool,
}

const PAN_EPSILON: f64 = 1e-9;

/// Clamp a candidate view center.
///
/// The check runs in the rotated frame: the image corners are rotated by
/// `rotation` and their axis-aligned box is compared with the viewport
/// extent at `zoom`. When the allowed interval on an axis is empty the
/// center collapses to its midpoint.
pub fn constrain_pan(target: Point, zoom: f64, rotation: f64, limits: &PanLimits) -> PanOutcome {
    if zoom <= 0.0 {
        return PanOutcome {
            point: target,
            constrained: false,
        };
    }

    let (sin, cos) = sin_cos_degrees(rotation);
    let rotate = |p: Point| Point::new(p.x * cos - p.y * sin, p.x * sin + p.y * cos);
    let unrotate = |p: Point| Point::new(p.x * cos + p.y * sin, -p.x * sin + p.y * cos);

    let corners = [
        Point::new(0.0, 0.0),
        Point::new(limits.image_width, 0.0),
        Point::new(0.0, limits.image_height),
        Point::new(limits.image_width, limits.image_height),
    ]
    .map(rotate);

    let (mut ax0, mut ay0) = (f64::INFINITY, f64::INFINITY);
    let (mut ax1, mut ay1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for c in corners {
        ax0 = ax0.min(c.x);
        ay0 = ay0.min(c.y);
        ax1 = ax1.max(c.x);
        ay1 = ay1.max(c.y);
    }

    let half_w = limits.viewport_width / (2.0 * zoom);
    let half_h = limits.viewport_height / (2.0 * zoom);

    let u = rotate(target);
    let ux = clamp_axis(u.x, ax0, ax1, half_w, limits.policy);
    let uy = clamp_axis(u.y, ay0, ay1, half_h, limits.policy);

    if (ux - u.x).abs() <= PAN_EPSILON && (uy - u.y).abs() <= PAN_EPSILON {
        return PanOutcome {
            point: target,
            constrained: false,
        };
    }

    PanOutcome {
        point: unrotate(Point::new(ux, uy)),
        constrained: true,
    }
}

fn clamp_axis(value: f64, lo_edge: f64, hi_edge: f64, half: f64, policy: PanPolicy) -> f64 {
    let mid = (lo_edge + hi_edge) / 2.0;
    let (lo, hi) = match policy {
        PanPolicy::Strict => (lo_edge + half, hi_edge - half),
        PanPolicy::Relaxed => (mid - half, mid + half),
        PanPolicy::Loose => (lo_edge, hi_edge),
    };
    if lo >= hi - PAN_EPSILON {
        return mid;
    }
    value.clamp(lo, hi)
}

/// Which bound a zoom request ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomLimit {
    Min,
    Max,
}

/// Clamp `zoom` into `[min, max]`.
///
/// The limit is reported only when the request lies strictly outside the
/// range, so re-requesting the bound itself is silent.
pub fn constrain_zoom(zoom: f64, min: f64, max: f64) -> (f64, Option<ZoomLimit>) {
    if zoom > max {
        (max, Some(ZoomLimit::Max))
    } else if zoom < min {
        (min, Some(ZoomLimit::Min))
    } else {
        (zoom, None)
    }
}
