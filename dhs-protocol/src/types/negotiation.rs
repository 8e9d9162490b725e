//! Values exchanged while negotiating a session.

use std::fmt;
use std::ops::BitOr;

use anyhow::bail;

use crate::codec::Compression;
use crate::compat::FormatVariant;
use crate::wire::{
    deser::{Deserialize, DeserializeError, DeserializeResult, Deserializer},
    ser::{Serialize, SerializeResult, Serializer},
};

/// Optional features a client announces in its `Hello`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(pub u32);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const ZLIB: Self = Self(1);
    pub const ZSTD: Self = Self(2);
    /// The client reassembles payloads sent as `LodDataChunk` frames.
    pub const CHUNKED_TRANSFER: Self = Self(4);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the client can decode bodies compressed with the given scheme.
    #[must_use]
    pub const fn supports(self, compression: Compression) -> bool {
        match compression {
            Compression::None => true,
            Compression::Zlib => self.contains(Self::ZLIB),
            Compression::Zstd => self.contains(Self::ZSTD),
        }
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = formatter.debug_set();
        for (flag, name) in [
            (Self::ZLIB, "ZLIB"),
            (Self::ZSTD, "ZSTD"),
            (Self::CHUNKED_TRANSFER, "CHUNKED_TRANSFER"),
        ] {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

impl Serialize for Capabilities {
    type Input = Self;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        u32::serialize(&value.0, ser)
    }
}

impl Deserialize for Capabilities {
    type Output = Self;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        // unknown bits are kept; newer clients may announce more than we understand
        Ok(Self(u32::deserialize(deser)?))
    }
}

impl Serialize for FormatVariant {
    type Input = Self;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        u8::serialize(&value.wire_id(), ser)
    }
}

impl Deserialize for FormatVariant {
    type Output = Self;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        let id = u8::deserialize(deser)?;
        match Self::from_wire_id(id) {
            Some(variant) => Ok(variant),
            None => bail!(DeserializeError::InvalidValue(format!(
                "unknown format variant: {id}"
            ))),
        }
    }
}

impl Serialize for Compression {
    type Input = Self;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        u8::serialize(&value.flag(), ser)
    }
}

impl Deserialize for Compression {
    type Output = Self;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        let flag = u8::deserialize(deser)?;
        match Self::from_flag(flag) {
            Some(compression) => Ok(compression),
            None => bail!(DeserializeError::InvalidValue(format!(
                "unknown compression: {flag}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_bits() {
        let caps = Capabilities::ZSTD | Capabilities::CHUNKED_TRANSFER;
        assert!(caps.contains(Capabilities::ZSTD));
        assert!(!caps.contains(Capabilities::ZLIB));
        assert!(caps.supports(Compression::None));
        assert!(caps.supports(Compression::Zstd));
        assert!(!caps.supports(Compression::Zlib));
        assert_eq!(format!("{caps:?}"), "{ZSTD, CHUNKED_TRANSFER}");
    }
}
