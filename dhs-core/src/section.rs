//! Contains the LOD section position primitives and the packed representation used on the wire.

use std::fmt::{self, Display};

use glam::I64Vec2;
use thiserror::Error;

use crate::dimension::DimensionId;

/// Errors raised when constructing positions from untrusted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SectionError {
    #[error("detail level {0} exceeds the maximum of {max}", max = DetailLevel::MAX.0)]
    DetailOutOfRange(u8),
    #[error("section coordinate {0} does not fit into {bits} bits", bits = SectionPos::COORD_BITS)]
    CoordinateOutOfRange(i64),
}

/// The resolution tier of a LOD section.
///
/// At level `d` a single column aggregates `2^d × 2^d` blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DetailLevel(u8);

impl DetailLevel {
    /// Full resolution: one column per block.
    pub const MIN: Self = Self(0);
    /// Coarsest tier this bridge can describe.
    pub const MAX: Self = Self(10);

    /// Creates a detail level if it lies within `MIN..=MAX`.
    ///
    /// # Errors
    ///
    /// Returns [`SectionError::DetailOutOfRange`] for values above [`DetailLevel::MAX`].
    pub const fn new(value: u8) -> Result<Self, SectionError> {
        if value > Self::MAX.0 {
            Err(SectionError::DetailOutOfRange(value))
        } else {
            Ok(Self(value))
        }
    }

    /// Returns the raw level.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Width of a single column in blocks.
    #[must_use]
    pub const fn column_width(self) -> i64 {
        1 << self.0
    }
}

impl Display for DetailLevel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "d{}", self.0)
    }
}

impl TryFrom<u8> for DetailLevel {
    type Error = SectionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Position of a LOD section, measured in section steps at its own detail level.
///
/// Sections always contain [`SectionPos::WIDTH`] × [`SectionPos::WIDTH`] columns, so a section
/// at detail `d` covers `64 · 2^d` blocks per side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SectionPos {
    x: i32,
    z: i32,
    detail: DetailLevel,
}

impl SectionPos {
    /// Number of columns per side of a section.
    pub const WIDTH: usize = 64;
    /// Number of columns in a section.
    pub const COLUMN_COUNT: usize = Self::WIDTH * Self::WIDTH;
    /// Number of bit shifts between column and section coordinates.
    pub const WIDTH_BITS: u32 = 6;

    /// Number of bits reserved for each coordinate in the packed form.
    pub const COORD_BITS: u32 = 28;
    /// Smallest representable coordinate.
    pub const COORD_MIN: i32 = -(1 << (Self::COORD_BITS - 1));
    /// Largest representable coordinate.
    pub const COORD_MAX: i32 = (1 << (Self::COORD_BITS - 1)) - 1;

    const DETAIL_OFFSET: u32 = 0;
    const DETAIL_MASK: u64 = 0xFF;
    const X_OFFSET: u32 = 8;
    const Z_OFFSET: u32 = Self::X_OFFSET + Self::COORD_BITS;
    const COORD_MASK: u64 = (1 << Self::COORD_BITS) - 1;

    /// Creates a section position if both coordinates fit into the packed form.
    ///
    /// # Errors
    ///
    /// Returns [`SectionError::CoordinateOutOfRange`] when a coordinate exceeds 28 signed bits.
    pub fn new(detail: DetailLevel, x: i32, z: i32) -> Result<Self, SectionError> {
        for coord in [x, z] {
            if !(Self::COORD_MIN..=Self::COORD_MAX).contains(&coord) {
                return Err(SectionError::CoordinateOutOfRange(i64::from(coord)));
            }
        }
        Ok(Self { x, z, detail })
    }

    /// Returns the section which contains the given block at the requested detail level.
    ///
    /// # Errors
    ///
    /// Fails if the resulting section coordinates do not fit into the packed form.
    pub fn containing_block(detail: DetailLevel, block: I64Vec2) -> Result<Self, SectionError> {
        let shift = Self::WIDTH_BITS + u32::from(detail.value());
        let section = block >> shift;
        let x = i32::try_from(section.x)
            .map_err(|_err| SectionError::CoordinateOutOfRange(section.x))?;
        let z = i32::try_from(section.y)
            .map_err(|_err| SectionError::CoordinateOutOfRange(section.y))?;
        Self::new(detail, x, z)
    }

    /// Section coordinate along the X axis.
    #[must_use]
    pub const fn x(self) -> i32 {
        self.x
    }

    /// Section coordinate along the Z axis.
    #[must_use]
    pub const fn z(self) -> i32 {
        self.z
    }

    #[must_use]
    pub const fn detail(self) -> DetailLevel {
        self.detail
    }

    /// Width of this section in blocks.
    #[must_use]
    pub const fn width_blocks(self) -> i64 {
        (Self::WIDTH as i64) << self.detail.0
    }

    /// Block coordinates (x, z) of the section's lowest corner.
    #[must_use]
    pub fn origin_block(self) -> I64Vec2 {
        I64Vec2::new(i64::from(self.x), i64::from(self.z)) * self.width_blocks()
    }

    /// Block coordinates (x, z) of the lowest corner of the column at the given index.
    ///
    /// Columns are stored row by row, X varying fastest.
    #[must_use]
    pub fn column_origin(self, column_index: usize) -> I64Vec2 {
        let width = Self::WIDTH as i64;
        #[expect(
            clippy::cast_possible_wrap,
            reason = "column indices are far below i64::MAX"
        )]
        let index = (column_index % Self::COLUMN_COUNT) as i64;
        let offset = I64Vec2::new(index % width, index / width);
        self.origin_block() + offset * self.detail.column_width()
    }

    /// Packs the position into its 64 bit wire representation.
    ///
    /// Layout: detail level in bits 0..8, x in bits 8..36 and z in bits 36..64.
    #[must_use]
    pub fn pack(self) -> u64 {
        #[expect(clippy::cast_sign_loss, reason = "two's complement bits are masked")]
        let (x, z) = (
            (i64::from(self.x) as u64) & Self::COORD_MASK,
            (i64::from(self.z) as u64) & Self::COORD_MASK,
        );
        (u64::from(self.detail.0) << Self::DETAIL_OFFSET)
            | (x << Self::X_OFFSET)
            | (z << Self::Z_OFFSET)
    }

    /// Restores a position from its packed form, sign-extending both coordinates.
    ///
    /// # Errors
    ///
    /// Fails if the detail level stored in the lowest byte exceeds [`DetailLevel::MAX`].
    pub fn unpack(packed: u64) -> Result<Self, SectionError> {
        #[expect(clippy::cast_possible_truncation, reason = "masked to eight bits")]
        let detail = DetailLevel::new(((packed >> Self::DETAIL_OFFSET) & Self::DETAIL_MASK) as u8)?;
        let x = Self::sign_extend((packed >> Self::X_OFFSET) & Self::COORD_MASK);
        let z = Self::sign_extend((packed >> Self::Z_OFFSET) & Self::COORD_MASK);
        Ok(Self { x, z, detail })
    }

    fn sign_extend(raw: u64) -> i32 {
        let unused_bits = 32 - Self::COORD_BITS;
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_possible_wrap,
            reason = "raw is masked to 28 bits; the shift pair restores the sign"
        )]
        let value = ((raw as u32) << unused_bits) as i32;
        value >> unused_bits
    }
}

impl Display for SectionPos {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "[{}, {}]@{}", self.x, self.z, self.detail)
    }
}

/// Identifies a single LOD unit: one section of one dimension at one detail level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LodChunkKey {
    pub dimension: DimensionId,
    pub section: SectionPos,
}

impl LodChunkKey {
    #[must_use]
    pub const fn new(dimension: DimensionId, section: SectionPos) -> Self {
        Self { dimension, section }
    }

    #[must_use]
    pub const fn detail(self) -> DetailLevel {
        self.section.detail()
    }
}

impl Display for LodChunkKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.dimension, self.section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_level_bounds() {
        assert_eq!(DetailLevel::new(10), Ok(DetailLevel::MAX));
        assert_eq!(DetailLevel::new(11), Err(SectionError::DetailOutOfRange(11)));
        assert_eq!(DetailLevel::MAX.column_width(), 1024);
    }

    #[test]
    fn pack_example_key() {
        let detail = DetailLevel::new(3).unwrap();
        let pos = SectionPos::new(detail, 4, -2).unwrap();
        let packed = pos.pack();
        assert_eq!(packed & 0xFF, 3);
        assert_eq!((packed >> 8) & 0x0FFF_FFFF, 4);
        assert_eq!((packed >> 36) & 0x0FFF_FFFF, 0x0FFF_FFFE);
        assert_eq!(SectionPos::unpack(packed), Ok(pos));
    }

    #[test]
    fn sign_extension_at_limits() {
        let detail = DetailLevel::MIN;
        for (x, z) in [
            (SectionPos::COORD_MIN, SectionPos::COORD_MAX),
            (SectionPos::COORD_MAX, SectionPos::COORD_MIN),
            (-1, 0),
            (0, -1),
        ] {
            let pos = SectionPos::new(detail, x, z).unwrap();
            let unpacked = SectionPos::unpack(pos.pack()).unwrap();
            assert_eq!((unpacked.x(), unpacked.z()), (x, z));
        }
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let detail = DetailLevel::MIN;
        assert!(SectionPos::new(detail, SectionPos::COORD_MAX + 1, 0).is_err());
        assert!(SectionPos::new(detail, 0, SectionPos::COORD_MIN - 1).is_err());
    }

    #[test]
    fn unpack_rejects_unknown_detail() {
        assert_eq!(
            SectionPos::unpack(0xFF),
            Err(SectionError::DetailOutOfRange(0xFF))
        );
    }

    #[test]
    fn geometry() {
        let pos = SectionPos::new(DetailLevel::new(3).unwrap(), 4, -2).unwrap();
        assert_eq!(pos.width_blocks(), 512);
        assert_eq!(pos.origin_block(), I64Vec2::new(2048, -1024));
        assert_eq!(pos.column_origin(0), I64Vec2::new(2048, -1024));
        assert_eq!(pos.column_origin(65), I64Vec2::new(2056, -1016));
        assert_eq!(
            SectionPos::containing_block(pos.detail(), I64Vec2::new(2100, -1)).unwrap(),
            SectionPos::new(pos.detail(), 4, -1).unwrap()
        );
    }
}
