//! Image pyramid structure.
//!
//! A pyramid is a stack of tiers, each a pre-scaled copy of the image cut
//! into fixed-size tiles. Tier 0 is the thumbnail; the last tier is the full
//! resolution image. This is the reverse of the numbering used by most tile
//! servers, which put full resolution at level 0.
//!
//! - [`PyramidDescriptor`]: tier geometry and tile addressing
//! - [`reconstruct`]: rebuilding tier sizes from the full-resolution size
//! - [`ChunkStore`] / [`ChunkedTable`]: lazily fetched packed-format tables

mod chunks;
mod descriptor;
pub mod reconstruct;

pub use chunks::{ChunkKey, ChunkRequest, ChunkStore, ChunkedTable, TableKind};
pub use descriptor::{PyramidDescriptor, Tier};
pub use reconstruct::{calculate_tier_values, halving_method, legacy_method, Rounding, TierDims};
