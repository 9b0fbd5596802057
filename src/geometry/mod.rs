//! Coordinate geometry for the view engine.
//!
//! Pure functions converting between image pixels, tier pixels, tile indices
//! and viewport pixels under zoom and rotation. Nothing here holds state or
//! performs I/O.

mod bounds;
mod constrain;
mod transform;

pub use bounds::{viewport_bounding_box_in_tiles, zoom_to_fill, zoom_to_fit, TileBounds};
pub use constrain::{constrain_pan, constrain_zoom, PanLimits, PanOutcome, PanPolicy, ZoomLimit};
pub use transform::{
    normalize_degrees, rotate_point, rotated_extent, sin_cos_degrees, snap_to_right_angle, Point,
    ViewTransform,
};
