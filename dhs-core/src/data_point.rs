//! Contains `DataPoint`, a vertical run of a single material within one LOD column.

use std::fmt;

use thiserror::Error;

/// A field value that does not fit into its slot of the packed data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("data point field `{field}` cannot hold {value}")]
pub struct DataPointError {
    pub field: &'static str,
    pub value: i64,
}

/// A packed run of equal material.
///
/// | bits   | field                        |
/// |--------|------------------------------|
/// | 0..32  | mapping id                   |
/// | 32..44 | height                       |
/// | 44..56 | start y (signed)             |
/// | 56..60 | sky light                    |
/// | 60..64 | block light                  |
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DataPoint(u64);

impl DataPoint {
    const MAPPING_ID_OFFSET: u32 = 0;
    const MAPPING_ID_MASK: u64 = 0xFFFF_FFFF;
    const HEIGHT_OFFSET: u32 = 32;
    const HEIGHT_MASK: u64 = 0x0FFF;
    const START_Y_OFFSET: u32 = 44;
    const START_Y_MASK: u64 = 0x0FFF;
    const SKY_LIGHT_OFFSET: u32 = 56;
    const BLOCK_LIGHT_OFFSET: u32 = 60;
    const LIGHT_MASK: u64 = 0x0F;

    /// Highest run length a data point can describe.
    pub const MAX_HEIGHT: u16 = 0x0FFF;
    /// Lowest start y a data point can describe.
    pub const MIN_START_Y: i16 = -0x0800;
    /// Highest start y a data point can describe.
    pub const MAX_START_Y: i16 = 0x07FF;
    /// Highest light level.
    pub const MAX_LIGHT: u8 = 0x0F;

    /// Packs the given fields.
    ///
    /// # Errors
    ///
    /// Fails if any field exceeds the width of its slot.
    pub fn new(
        mapping_id: u32,
        height: u16,
        start_y: i16,
        sky_light: u8,
        block_light: u8,
    ) -> Result<Self, DataPointError> {
        if height > Self::MAX_HEIGHT {
            return Err(DataPointError {
                field: "height",
                value: i64::from(height),
            });
        }
        if !(Self::MIN_START_Y..=Self::MAX_START_Y).contains(&start_y) {
            return Err(DataPointError {
                field: "start_y",
                value: i64::from(start_y),
            });
        }
        for (field, light) in [("sky_light", sky_light), ("block_light", block_light)] {
            if light > Self::MAX_LIGHT {
                return Err(DataPointError {
                    field,
                    value: i64::from(light),
                });
            }
        }

        #[expect(clippy::cast_sign_loss, reason = "two's complement bits are masked")]
        let start_y_bits = (i64::from(start_y) as u64) & Self::START_Y_MASK;

        Ok(Self(
            (u64::from(mapping_id) << Self::MAPPING_ID_OFFSET)
                | (u64::from(height) << Self::HEIGHT_OFFSET)
                | (start_y_bits << Self::START_Y_OFFSET)
                | (u64::from(sky_light) << Self::SKY_LIGHT_OFFSET)
                | (u64::from(block_light) << Self::BLOCK_LIGHT_OFFSET),
        ))
    }

    /// Wraps an already packed value. Every bit pattern is a valid data point.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Index into the payload's mapping table.
    #[must_use]
    pub const fn mapping_id(self) -> u32 {
        #[expect(clippy::cast_possible_truncation, reason = "masked to 32 bits")]
        let id = ((self.0 >> Self::MAPPING_ID_OFFSET) & Self::MAPPING_ID_MASK) as u32;
        id
    }

    /// Number of blocks this run spans.
    #[must_use]
    pub const fn height(self) -> u16 {
        #[expect(clippy::cast_possible_truncation, reason = "masked to 12 bits")]
        let height = ((self.0 >> Self::HEIGHT_OFFSET) & Self::HEIGHT_MASK) as u16;
        height
    }

    /// Lowest y coordinate of this run, relative to the dimension's minimum y.
    #[must_use]
    pub const fn start_y(self) -> i16 {
        #[expect(clippy::cast_possible_truncation, reason = "masked to 12 bits")]
        let raw = (((self.0 >> Self::START_Y_OFFSET) & Self::START_Y_MASK) as u16) << 4;
        #[expect(
            clippy::cast_possible_wrap,
            reason = "the shift pair restores the sign"
        )]
        let signed = raw as i16;
        signed >> 4
    }

    #[must_use]
    pub const fn sky_light(self) -> u8 {
        #[expect(clippy::cast_possible_truncation, reason = "masked to four bits")]
        let light = ((self.0 >> Self::SKY_LIGHT_OFFSET) & Self::LIGHT_MASK) as u8;
        light
    }

    #[must_use]
    pub const fn block_light(self) -> u8 {
        #[expect(clippy::cast_possible_truncation, reason = "masked to four bits")]
        let light = ((self.0 >> Self::BLOCK_LIGHT_OFFSET) & Self::LIGHT_MASK) as u8;
        light
    }
}

impl fmt::Debug for DataPoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DataPoint")
            .field("mapping_id", &self.mapping_id())
            .field("height", &self.height())
            .field("start_y", &self.start_y())
            .field("sky_light", &self.sky_light())
            .field("block_light", &self.block_light())
            .finish()
    }
}
