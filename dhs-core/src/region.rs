//! Regions are the ownership unit of regionized threading.

use std::fmt::{self, Display};

use glam::I64Vec2;

use crate::{dimension::DimensionId, section::LodChunkKey};

/// Position of a region, measured in region steps within its dimension.
///
/// A region spans `2^shift` chunks of [`RegionPos::CHUNK_SIZE`] blocks per side, where `shift`
/// is a host setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegionPos {
    pub dimension: DimensionId,
    pub pos: I64Vec2,
}

impl RegionPos {
    /// Number of bit shifts between block and chunk coordinates.
    pub const CHUNK_SIZE_BITS: u32 = 4;
    /// Blocks per chunk side.
    pub const CHUNK_SIZE: i64 = 1 << Self::CHUNK_SIZE_BITS;
    /// Default number of shifts between chunk and region coordinates.
    pub const DEFAULT_SHIFT: u8 = 3;

    #[must_use]
    pub const fn new(dimension: DimensionId, pos: I64Vec2) -> Self {
        Self { dimension, pos }
    }

    /// Returns the region containing the given block.
    #[must_use]
    pub fn for_block(dimension: DimensionId, block: I64Vec2, shift: u8) -> Self {
        Self {
            dimension,
            pos: block >> (Self::CHUNK_SIZE_BITS + u32::from(shift)),
        }
    }

    /// Returns the region containing the origin block of the key's section.
    #[must_use]
    pub fn for_key(key: LodChunkKey, shift: u8) -> Self {
        Self::for_block(key.dimension, key.section.origin_block(), shift)
    }

    /// Width of a region in blocks for the given shift.
    #[must_use]
    pub const fn width_blocks(shift: u8) -> i64 {
        Self::CHUNK_SIZE << shift
    }
}

impl Display for RegionPos {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        // angle brackets distinguish regions from sections
        write!(formatter, "{}:<{}, {}>", self.dimension, self.pos.x, self.pos.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::{DetailLevel, SectionPos};

    #[test]
    fn region_of_key() {
        let section = SectionPos::new(DetailLevel::new(3).unwrap(), 4, -2).unwrap();
        let key = LodChunkKey::new(DimensionId(0), section);
        // origin block is (2048, -1024), a region at shift 3 is 128 blocks wide
        let region = RegionPos::for_key(key, RegionPos::DEFAULT_SHIFT);
        assert_eq!(region.pos, I64Vec2::new(16, -8));
        assert_eq!(RegionPos::width_blocks(3), 128);
    }

    #[test]
    fn negative_blocks_floor() {
        let region = RegionPos::for_block(DimensionId(1), I64Vec2::new(-1, 127), 3);
        assert_eq!(region.pos, I64Vec2::new(-1, 0));
        assert_eq!(region.dimension, DimensionId(1));
    }

    #[test]
    fn full_resolution_sections_share_regions() {
        let detail = DetailLevel::MIN;
        let first = SectionPos::new(detail, 0, 0).unwrap();
        let second = SectionPos::new(detail, 1, 0).unwrap();
        let third = SectionPos::new(detail, 2, 0).unwrap();
        let region_of = |section| RegionPos::for_key(LodChunkKey::new(DimensionId(0), section), 3);
        assert_eq!(region_of(first), region_of(second));
        assert_ne!(region_of(first), region_of(third));
    }
}
