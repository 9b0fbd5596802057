//! Animated transitions between view poses.

use std::collections::VecDeque;

use super::state::ViewPose;
use crate::geometry::normalize_degrees;

/// Default number of intermediate poses of an animated `set_view`.
pub const DEFAULT_ANIMATION_STEPS: u32 = 8;

/// Queue of poses leading to a target, one per tick.
///
/// Pan is linear, zoom is interpolated geometrically so each step zooms by
/// the same factor, and rotation takes the shorter way round.
#[derive(Debug, Clone, Default)]
pub struct ViewAnimation {
    poses: VecDeque<ViewPose>,
}

impl ViewAnimation {
    pub fn new(from: ViewPose, to: ViewPose, steps: u32) -> Self {
        let steps = steps.max(1);
        let mut delta_r = normalize_degrees(to.rotation - from.rotation);
        if delta_r > 180.0 {
            delta_r -= 360.0;
        }
        let zoom_ratio = if from.zoom > 0.0 && to.zoom > 0.0 {
            Some(to.zoom / from.zoom)
        } else {
            None
        };

        let mut poses = VecDeque::with_capacity(steps as usize);
        for i in 1..steps {
            let t = i as f64 / steps as f64;
            let zoom = match zoom_ratio {
                Some(ratio) => from.zoom * ratio.powf(t),
                None => from.zoom + (to.zoom - from.zoom) * t,
            };
            poses.push_back(ViewPose::new(
                from.x + (to.x - from.x) * t,
                from.y + (to.y - from.y) * t,
                zoom,
                normalize_degrees(from.rotation + delta_r * t),
            ));
        }
        poses.push_back(to);
        Self { poses }
    }

    /// Next pose, if any remain.
    pub fn advance(&mut self) -> Option<ViewPose> {
        self.poses.pop_front()
    }

    pub fn is_done(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.poses.len()
    }
}
