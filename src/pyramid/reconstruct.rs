//! Tier geometry reconstruction.
//!
//! Folder sources and PFF files record only the full-resolution size and the
//! tile size. The rest of the pyramid is rebuilt by repeated halving. Older
//! encoders disagree on rounding, so a legacy set of rules is tried when the
//! standard halving does not reproduce the declared tile count.
//!
//! All functions return tiers thumbnail-first (index 0 = smallest).

use tracing::debug;

use crate::error::FormatError;

/// Safety bound on the number of tiers a reconstruction may produce.
const MAX_TIERS: usize = 40;

/// Rounding rule used when deriving the next-smaller tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// `floor(n / 2)` from the previous tier. This is the standard method.
    Floor,

    /// `floor((n + 1) / 2)` from the previous tier (ceiling halving).
    CeilHalf,

    /// `floor(full / divider)` with the divider doubling each step; stops
    /// only once both dimensions are strictly below the tile size.
    Divider,
}

/// Order in which legacy rounding rules are tried after [`Rounding::Floor`].
pub const LEGACY_ROUNDINGS: [Rounding; 2] = [Rounding::CeilHalf, Rounding::Divider];

/// Dimensions of one reconstructed tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierDims {
    pub width: u32,
    pub height: u32,
}

impl TierDims {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of tiles covering this tier.
    pub fn tile_count(&self, tile_width: u32, tile_height: u32) -> u64 {
        self.tiles_x(tile_width) as u64 * self.tiles_y(tile_height) as u64
    }

    #[inline]
    pub fn tiles_x(&self, tile_width: u32) -> u32 {
        self.width.div_ceil(tile_width).max(1)
    }

    #[inline]
    pub fn tiles_y(&self, tile_height: u32) -> u32 {
        self.height.div_ceil(tile_height).max(1)
    }
}

/// Standard halving method.
///
/// Starts from full resolution and halves (floor) until both dimensions fit
/// within one tile.
pub fn halving_method(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Vec<TierDims> {
    reconstruct(width, height, tile_width, tile_height, Rounding::Floor)
}

/// Legacy method with a configurable rounding rule.
pub fn legacy_method(
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    rounding: Rounding,
) -> Vec<TierDims> {
    reconstruct(width, height, tile_width, tile_height, rounding)
}

/// Rebuild the tier list with the given rounding rule.
pub fn reconstruct(
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    rounding: Rounding,
) -> Vec<TierDims> {
    let mut tiers = vec![TierDims::new(width, height)];
    if tile_width == 0 || tile_height == 0 {
        return tiers;
    }

    let (mut w, mut h) = (width, height);
    let mut divider: u64 = 2;

    loop {
        let more = match rounding {
            Rounding::Floor | Rounding::CeilHalf => w > tile_width || h > tile_height,
            Rounding::Divider => w >= tile_width || h >= tile_height,
        };
        if !more || tiers.len() >= MAX_TIERS {
            break;
        }

        (w, h) = match rounding {
            Rounding::Floor => (w / 2, h / 2),
            Rounding::CeilHalf => ((w + 1) / 2, (h + 1) / 2),
            Rounding::Divider => {
                let next = ((width as u64 / divider) as u32, (height as u64 / divider) as u32);
                divider *= 2;
                next
            }
        };
        w = w.max(1);
        h = h.max(1);
        tiers.push(TierDims::new(w, h));

        if w == 1 && h == 1 {
            break;
        }
    }

    tiers.reverse();
    tiers
}

/// Total tile count over all tiers.
pub fn total_tile_count(tiers: &[TierDims], tile_width: u32, tile_height: u32) -> u64 {
    tiers
        .iter()
        .map(|t| t.tile_count(tile_width, tile_height))
        .sum()
}

/// Reconstruct tiers and cross-check them against a declared tile count.
///
/// The standard halving method is tried first, then each legacy rounding in
/// [`LEGACY_ROUNDINGS`] order. When nothing matches, a
/// [`FormatError::TileCountMismatch`] lists every computed total.
/// Without a declared count the standard method is returned as-is.
pub fn calculate_tier_values(
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    declared: Option<u64>,
) -> Result<(Vec<TierDims>, Rounding), FormatError> {
    if width == 0 || height == 0 {
        return Err(FormatError::InvalidGeometry(format!(
            "image size {}x{}",
            width, height
        )));
    }
    if tile_width == 0 || tile_height == 0 {
        return Err(FormatError::InvalidGeometry(format!(
            "tile size {}x{}",
            tile_width, tile_height
        )));
    }

    let primary = halving_method(width, height, tile_width, tile_height);
    let Some(declared) = declared else {
        return Ok((primary, Rounding::Floor));
    };

    let primary_total = total_tile_count(&primary, tile_width, tile_height);
    if primary_total == declared {
        return Ok((primary, Rounding::Floor));
    }

    let mut computed = vec![primary_total];
    for rounding in LEGACY_ROUNDINGS {
        let tiers = legacy_method(width, height, tile_width, tile_height, rounding);
        let total = total_tile_count(&tiers, tile_width, tile_height);
        if total == declared {
            debug!(?rounding, declared, "tier reconstruction matched legacy rounding");
            return Ok((tiers, rounding));
        }
        computed.push(total);
    }

    Err(FormatError::TileCountMismatch { declared, computed })
}
