//! Image space to viewport space transform.
//!
//! Image space is full-resolution pixels with the origin at the top-left of
//! the image. Viewport space is display pixels with the origin at the
//! top-left of the viewport. A view is described by the image point shown at
//! the viewport center, the zoom, and the rotation about that point.

/// A point in either image or viewport space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Normalize an angle in degrees into `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    let r = degrees % 360.0;
    let r = if r < 0.0 { r + 360.0 } else { r };
    // -0.0 and values that round up to 360 collapse onto 0
    if r >= 360.0 || r == 0.0 {
        0.0
    } else {
        r
    }
}

/// Snap an angle to the nearest multiple of 90 degrees, normalized.
pub fn snap_to_right_angle(degrees: f64) -> f64 {
    normalize_degrees((degrees / 90.0).round() * 90.0)
}

/// Sine and cosine of an angle in degrees.
///
/// Multiples of 90 degrees return exact values so that right-angle rotations
/// introduce no floating point drift.
pub fn sin_cos_degrees(degrees: f64) -> (f64, f64) {
    let r = normalize_degrees(degrees);
    if r == 0.0 {
        (0.0, 1.0)
    } else if r == 90.0 {
        (1.0, 0.0)
    } else if r == 180.0 {
        (0.0, -1.0)
    } else if r == 270.0 {
        (-1.0, 0.0)
    } else {
        r.to_radians().sin_cos()
    }
}

/// Rotate `p` about `center` by `degrees` (clockwise on screen, y pointing down).
pub fn rotate_point(p: Point, center: Point, degrees: f64) -> Point {
    let (sin, cos) = sin_cos_degrees(degrees);
    let dx = p.x - center.x;
    let dy = p.y - center.y;
    Point::new(
        center.x + dx * cos - dy * sin,
        center.y + dx * sin + dy * cos,
    )
}

/// Width and height of the axis-aligned box enclosing a `width` x `height`
/// rectangle rotated by `degrees`.
pub fn rotated_extent(width: f64, height: f64, degrees: f64) -> (f64, f64) {
    let (sin, cos) = sin_cos_degrees(degrees);
    let (sin, cos) = (sin.abs(), cos.abs());
    (width * cos + height * sin, width * sin + height * cos)
}

// =============================================================================
// ViewTransform
// =============================================================================

/// Affine mapping between image space and viewport space for one view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    /// Image point displayed at the viewport center
    pub center: Point,
    /// 1.0 = one image pixel per display pixel
    pub zoom: f64,
    /// Degrees, normalized into `[0, 360)`
    pub rotation: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
}

impl ViewTransform {
    pub fn new(
        center: Point,
        zoom: f64,
        rotation: f64,
        viewport_width: f64,
        viewport_height: f64,
    ) -> Self {
        Self {
            center,
            zoom,
            rotation: normalize_degrees(rotation),
            viewport_width,
            viewport_height,
        }
    }

    pub fn viewport_center(&self) -> Point {
        Point::new(self.viewport_width / 2.0, self.viewport_height / 2.0)
    }

    /// Map an image point to the viewport.
    pub fn image_to_viewport(&self, p: Point) -> Point {
        let (sin, cos) = sin_cos_degrees(self.rotation);
        let dx = p.x - self.center.x;
        let dy = p.y - self.center.y;
        let vc = self.viewport_center();
        Point::new(
            vc.x + (dx * cos - dy * sin) * self.zoom,
            vc.y + (dx * sin + dy * cos) * self.zoom,
        )
    }

    /// Map a viewport point back to the image.
    pub fn viewport_to_image(&self, p: Point) -> Point {
        let (sin, cos) = sin_cos_degrees(self.rotation);
        let vc = self.viewport_center();
        let dx = (p.x - vc.x) / self.zoom;
        let dy = (p.y - vc.y) / self.zoom;
        Point::new(
            self.center.x + dx * cos + dy * sin,
            self.center.y - dx * sin + dy * cos,
        )
    }

    /// Image-space axis-aligned box covered by the viewport, with each half
    /// extent scaled by `buffer` about the view center.
    ///
    /// Returns `(left, top, right, bottom)`.
    pub fn visible_image_rect(&self, buffer: f64) -> (f64, f64, f64, f64) {
        let corners = [
            Point::new(0.0, 0.0),
            Point::new(self.viewport_width, 0.0),
            Point::new(0.0, self.viewport_height),
            Point::new(self.viewport_width, self.viewport_height),
        ]
        .map(|c| self.viewport_to_image(c));

        let (mut x0, mut y0) = (f64::INFINITY, f64::INFINITY);
        let (mut x1, mut y1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for c in corners {
            x0 = x0.min(c.x);
            y0 = y0.min(c.y);
            x1 = x1.max(c.x);
            y1 = y1.max(c.y);
        }

        let half_w = (x1 - x0) / 2.0 * buffer;
        let half_h = (y1 - y0) / 2.0 * buffer;
        (
            self.center.x - half_w,
            self.center.y - half_h,
            self.center.x + half_w,
            self.center.y + half_h,
        )
    }
}
