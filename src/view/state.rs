//! Authoritative view pose and its zoom bounds.

use std::fmt;
use std::str::FromStr;

use crate::geometry::{
    normalize_degrees, snap_to_right_angle, zoom_to_fill, zoom_to_fit, PanLimits, PanPolicy, Point,
    ViewTransform,
};

/// Center, zoom and rotation of a view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewPose {
    /// Image pixel at the viewport center
    pub x: f64,
    pub y: f64,
    /// 1.0 = 100%
    pub zoom: f64,
    /// Degrees in `[0, 360)`
    pub rotation: f64,
}

impl ViewPose {
    pub const fn new(x: f64, y: f64, zoom: f64, rotation: f64) -> Self {
        Self {
            x,
            y,
            zoom,
            rotation,
        }
    }
}

/// Convert an API zoom value: values in `(1, 100]` are percentages.
pub fn normalize_api_zoom(zoom: f64) -> f64 {
    if zoom > 1.0 && zoom <= 100.0 {
        zoom / 100.0
    } else {
        zoom
    }
}

/// Normalize a rotation, snapping to a right angle unless free rotation is on.
pub fn normalize_rotation(degrees: f64, free_rotation: bool) -> f64 {
    if free_rotation {
        normalize_degrees(degrees)
    } else {
        snap_to_right_angle(degrees)
    }
}

/// Lower zoom bound policy.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ZoomBound {
    /// The whole image fits the viewport
    #[default]
    Fit,
    /// The image covers the viewport
    Fill,
    Value(f64),
}

impl FromStr for ZoomBound {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fit" => Ok(ZoomBound::Fit),
            "fill" => Ok(ZoomBound::Fill),
            other => other
                .parse::<f64>()
                .ok()
                .filter(|z| *z > 0.0)
                .map(|z| ZoomBound::Value(normalize_api_zoom(z)))
                .ok_or_else(|| format!("invalid zoom bound '{}', expected fit, fill or a number", s)),
        }
    }
}

impl fmt::Display for ZoomBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoomBound::Fit => f.write_str("fit"),
            ZoomBound::Fill => f.write_str("fill"),
            ZoomBound::Value(z) => write!(f, "{}", z),
        }
    }
}

/// Surface offset accumulated by dragging and pinching, not yet applied to
/// the pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingOffset {
    pub dx: f64,
    pub dy: f64,
    pub scale: f64,
}

impl Default for PendingOffset {
    fn default() -> Self {
        Self {
            dx: 0.0,
            dy: 0.0,
            scale: 1.0,
        }
    }
}

impl PendingOffset {
    pub fn is_identity(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0 && self.scale == 1.0
    }
}

/// Current view of the image.
#[derive(Debug, Clone)]
pub struct ViewState {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
    pub rotation: f64,

    pub viewport_width: f64,
    pub viewport_height: f64,

    pub min_zoom: f64,
    pub max_zoom: f64,
    pub fit_zoom: f64,
    pub fill_zoom: f64,

    pub tier_current: usize,
    pub tier_backfill: usize,
    /// Backfill tracks `tier_current` instead of a precached tier
    pub backfill_dynamic: bool,
    /// Scale applied on top of `tier_current`'s native resolution
    pub tier_scale: f64,

    prior: Option<ViewPose>,
    pending: PendingOffset,
}

impl ViewState {
    pub fn new(viewport_width: f64, viewport_height: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
            rotation: 0.0,
            viewport_width,
            viewport_height,
            min_zoom: 0.0,
            max_zoom: 1.0,
            fit_zoom: 1.0,
            fill_zoom: 1.0,
            tier_current: 0,
            tier_backfill: 0,
            backfill_dynamic: false,
            tier_scale: 1.0,
            prior: None,
            pending: PendingOffset::default(),
        }
    }

    pub fn pose(&self) -> ViewPose {
        ViewPose::new(self.x, self.y, self.zoom, self.rotation)
    }

    pub fn set_pose(&mut self, pose: ViewPose) {
        self.x = pose.x;
        self.y = pose.y;
        self.zoom = pose.zoom;
        self.rotation = normalize_degrees(pose.rotation);
    }

    pub fn transform(&self) -> ViewTransform {
        ViewTransform::new(
            Point::new(self.x, self.y),
            self.zoom,
            self.rotation,
            self.viewport_width,
            self.viewport_height,
        )
    }

    /// Remember the current pose for [`ViewState::prior`].
    pub fn remember_prior(&mut self) {
        self.prior = Some(self.pose());
    }

    pub fn prior(&self) -> Option<ViewPose> {
        self.prior
    }

    /// Recompute fit/fill zoom and the zoom range for the current viewport
    /// and rotation.
    pub fn update_zoom_limits(
        &mut self,
        image_width: f64,
        image_height: f64,
        min: ZoomBound,
        max: f64,
    ) {
        self.fit_zoom = zoom_to_fit(
            self.viewport_width,
            self.viewport_height,
            image_width,
            image_height,
            self.rotation,
        );
        self.fill_zoom = zoom_to_fill(
            self.viewport_width,
            self.viewport_height,
            image_width,
            image_height,
            self.rotation,
        );
        self.min_zoom = match min {
            ZoomBound::Fit => self.fit_zoom,
            ZoomBound::Fill => self.fill_zoom,
            ZoomBound::Value(z) => z,
        };
        self.max_zoom = max.max(self.min_zoom);
    }

    pub fn pan_limits(&self, image_width: f64, image_height: f64, policy: PanPolicy) -> PanLimits {
        PanLimits {
            image_width,
            image_height,
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            policy,
        }
    }

    pub fn pending_offset(&self) -> PendingOffset {
        self.pending
    }

    pub fn add_pending_offset(&mut self, dx: f64, dy: f64) {
        self.pending.dx += dx;
        self.pending.dy += dy;
    }

    /// Scale the pending offset about the viewport center.
    pub fn scale_pending_offset(&mut self, scale: f64) {
        if scale > 0.0 {
            self.pending.scale *= scale;
            self.pending.dx *= scale;
            self.pending.dy *= scale;
        }
    }

    /// Pose the pending offset leads to, clearing the offset.
    ///
    /// The surface displays `c + s * (p - c) + d` for viewport point `p`,
    /// so the content now at the viewport center came from `c - d / s`.
    pub fn take_pending_pose(&mut self) -> Option<ViewPose> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_identity() {
            return None;
        }
        let transform = self.transform();
        let vc = transform.viewport_center();
        let source = Point::new(
            vc.x - pending.dx / pending.scale,
            vc.y - pending.dy / pending.scale,
        );
        let center = transform.viewport_to_image(source);
        Some(ViewPose::new(
            center.x,
            center.y,
            self.zoom * pending.scale,
            self.rotation,
        ))
    }
}
