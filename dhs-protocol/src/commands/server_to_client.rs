use std::ops::Deref;

use anyhow::bail;
use dhs_core::SectionPos;

use super::CommandDirection;
use super::CommandProperties;
use crate::codec::Compression;
use crate::compat::FormatVariant;
use crate::types::BinaryData32;
use crate::types::Flagged;
use crate::wire::deser::Deserialize;
use crate::wire::deser::DeserializeError;
use crate::wire::deser::DeserializeResult;
use crate::wire::deser::Deserializer;
use crate::wire::ser::Serialize;
use crate::wire::ser::SerializeResult;
use crate::wire::ser::Serializer;

define_protocol!(ToClient, ToClientCommand => {
    Welcome, 0x81 => WelcomeSpec,
    LodData, 0x82 => LodDataSpec,
    LodDataChunk, 0x83 => LodDataChunkSpec,
    LodUnavailable, 0x84 => LodUnavailableSpec,
    Backpressure, 0x85 => BackpressureSpec,
    LodUpToDate, 0x86 => LodUpToDateSpec,
    UnsupportedVersion, 0x87 => UnsupportedVersionSpec,
    CloseReason, 0x88 => CloseReasonSpec
});

wire_struct! {
    /// Concludes a successful handshake.
    pub struct WelcomeSpec {
        pub protocol_version: u16,
        pub variant: FormatVariant,
        pub compression: Compression,
        pub config: RemoteSessionConfig,
    }
}

wire_struct! {
    /// Server settings the client has to respect.
    pub struct RemoteSessionConfig {
        pub max_outstanding_requests: u16,
        pub min_detail_level: u8,
        pub max_detail_level: u8,
        pub distant_generation_enabled: bool,
        pub border: Option<WorldBorder> as Flagged<WorldBorder>,
    }
}

wire_struct! {
    /// A square world border in block coordinates.
    pub struct WorldBorder {
        pub center_x: i32,
        pub center_z: i32,
        /// half the side length
        pub radius: u32,
    }
}

impl WorldBorder {
    /// Returns `false` if the section lies entirely outside of this border.
    #[must_use]
    pub fn intersects(&self, section: SectionPos) -> bool {
        let origin = section.origin_block();
        let width = section.width_blocks();
        let radius = i64::from(self.radius);
        let center_x = i64::from(self.center_x);
        let center_z = i64::from(self.center_z);
        // both ranges are half-open: [start, start + width)
        origin.x < center_x + radius
            && origin.x + width > center_x - radius
            && origin.y < center_z + radius
            && origin.y + width > center_z - radius
    }
}

/// Upper bound of the bytes a `LodData` or `LodDataChunk` frame adds on top of its data.
pub const LOD_FRAME_OVERHEAD: usize = 16;

/// Where the encoded payload of a `LodData` response can be found.
#[derive(Debug, Clone, PartialEq)]
pub enum LodDataBody {
    /// The payload follows directly.
    Inline(Vec<u8>),
    /// The payload has been sent as `LodDataChunk` frames with this buffer id.
    Buffered(u32),
}

impl Serialize for LodDataBody {
    type Input = Self;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        match value {
            LodDataBody::Inline(data) => {
                u8::serialize(&0, ser)?;
                BinaryData32::serialize(data, ser)
            }
            LodDataBody::Buffered(buffer_id) => {
                u8::serialize(&1, ser)?;
                u32::serialize(buffer_id, ser)
            }
        }
    }
}

impl Deserialize for LodDataBody {
    type Output = Self;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        match u8::deserialize(deser)? {
            0 => Ok(LodDataBody::Inline(BinaryData32::deserialize(deser)?)),
            1 => Ok(LodDataBody::Buffered(u32::deserialize(deser)?)),
            kind => bail!(DeserializeError::InvalidValue(format!(
                "unknown LodData body kind: {kind}"
            ))),
        }
    }
}

wire_struct! {
    pub struct LodDataSpec {
        pub request_id: u32,
        pub body: LodDataBody,
    }
}

wire_struct! {
    /// One slice of a payload too large for a single frame.
    pub struct LodDataChunkSpec {
        pub buffer_id: u32,
        /// set on the first slice of a buffer; the client starts a new buffer
        pub is_first: bool,
        pub data: Vec<u8> as BinaryData32,
    }
}

/// Why a request was answered without data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnavailableReason {
    NoData,
    DetailNotServed,
    /// distant generation is disabled for the requested world
    Disabled,
    OutsideBorder,
    RegionUnavailable,
    Internal,
}

impl UnavailableReason {
    const ALL: [Self; 6] = [
        Self::NoData,
        Self::DetailNotServed,
        Self::Disabled,
        Self::OutsideBorder,
        Self::RegionUnavailable,
        Self::Internal,
    ];

    #[must_use]
    pub const fn wire_id(self) -> u8 {
        match self {
            Self::NoData => 0,
            Self::DetailNotServed => 1,
            Self::Disabled => 2,
            Self::OutsideBorder => 3,
            Self::RegionUnavailable => 4,
            Self::Internal => 5,
        }
    }
}

impl Serialize for UnavailableReason {
    type Input = Self;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        u8::serialize(&value.wire_id(), ser)
    }
}

impl Deserialize for UnavailableReason {
    type Output = Self;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        let id = u8::deserialize(deser)?;
        match Self::ALL.into_iter().find(|reason| reason.wire_id() == id) {
            Some(reason) => Ok(reason),
            None => bail!(DeserializeError::InvalidValue(format!(
                "unknown unavailable reason: {id}"
            ))),
        }
    }
}

wire_struct! {
    pub struct LodUnavailableSpec {
        pub request_id: u32,
        pub reason: UnavailableReason,
    }
}

wire_struct! {
    /// The request was rejected because too many requests are in flight. It may be retried.
    pub struct BackpressureSpec {
        pub request_id: u32,
    }
}

wire_struct! {
    /// The client's cached copy is current.
    pub struct LodUpToDateSpec {
        pub request_id: u32,
    }
}

wire_struct! {
    pub struct UnsupportedVersionSpec {
        pub min_supported: u16,
        pub max_supported: u16,
    }
}

wire_struct! {
    pub struct CloseReasonSpec {
        pub reason: String,
    }
}

#[cfg(test)]
mod tests {
    use dhs_core::DetailLevel;

    use super::*;

    #[test]
    fn border_intersection() {
        let border = WorldBorder {
            center_x: 0,
            center_z: 0,
            radius: 1000,
        };
        let detail = DetailLevel::new(3).unwrap();
        // 512 blocks per section: section 1 spans [512, 1024)
        assert!(border.intersects(SectionPos::new(detail, 1, 1).unwrap()));
        assert!(border.intersects(SectionPos::new(detail, -2, -2).unwrap()));
        assert!(!border.intersects(SectionPos::new(detail, 2, 0).unwrap()));
        assert!(!border.intersects(SectionPos::new(detail, 0, -3).unwrap()));
    }
}
