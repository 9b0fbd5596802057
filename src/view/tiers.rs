//! Frontfill and backfill tier selection.

use crate::pyramid::PyramidDescriptor;

/// Default upscale a tier may be drawn at before the next finer tier is used.
pub const DEFAULT_TIERS_SCALE_UP_MAX: f64 = 1.15;

/// Coarsest tier whose native zoom, allowing `scale_up_max` upscaling,
/// reaches `zoom`.
///
/// Walks down from the full-resolution tier while the next coarser tier
/// would still be upscaled by no more than `scale_up_max`.
pub fn select_tier(desc: &PyramidDescriptor, zoom: f64, scale_up_max: f64) -> usize {
    let mut tier = desc.max_tier();
    while tier > 0 && desc.native_zoom(tier - 1) * scale_up_max >= zoom {
        tier -= 1;
    }
    tier
}

/// How the backfill tier follows the frontfill tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillPolicy {
    /// Tier counts up to which the static backfill tier is 0, then 1;
    /// larger pyramids use tier 2
    pub thresholds: (usize, usize),
    /// Frontfill tiers above this use dynamic backfill
    pub dynamic_threshold: usize,
    /// Tiers dynamic backfill stays behind frontfill
    pub dynamic_adjust: usize,
}

impl Default for BackfillPolicy {
    fn default() -> Self {
        Self {
            thresholds: (3, 6),
            dynamic_threshold: 6,
            dynamic_adjust: 3,
        }
    }
}

/// Backfill tier for one view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillChoice {
    pub tier: usize,
    /// Loaded on demand rather than precached
    pub dynamic: bool,
}

impl BackfillPolicy {
    /// Precached low tier for a pyramid of `tier_count` tiers.
    pub fn static_tier(&self, tier_count: usize) -> usize {
        let tier = if tier_count <= self.thresholds.0 {
            0
        } else if tier_count <= self.thresholds.1 {
            1
        } else {
            2
        };
        tier.min(tier_count.saturating_sub(1))
    }

    pub fn select(&self, tier_count: usize, tier_current: usize) -> BackfillChoice {
        if tier_current > self.dynamic_threshold {
            return BackfillChoice {
                tier: tier_current.saturating_sub(self.dynamic_adjust),
                dynamic: true,
            };
        }
        BackfillChoice {
            tier: self.static_tier(tier_count).min(tier_current),
            dynamic: false,
        }
    }
}
