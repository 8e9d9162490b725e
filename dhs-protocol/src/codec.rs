//! Encodes and decodes LOD section payloads.
//!
//! A payload consists of a fixed header followed by a body which may be compressed:
//!
//! | field                   | width                                   |
//! |-------------------------|-----------------------------------------|
//! | format version tag      | see [`PayloadLayout`]                   |
//! | dimension id            | `u16`                                   |
//! | packed section position | `u64`                                   |
//! | timestamp               | `i64`                                   |
//! | column count            | `u16` (0 or 4096)                       |
//! | sample count            | `u32`                                   |
//! | compression flag        | `u8`                                    |
//! | body length             | `u32`                                   |
//!
//! The body holds the mapping table, one length-prefixed run of data points per column and
//! the beacons. Compression never touches the header.

use std::fmt::{self, Display};
use std::str::FromStr;

use anyhow::bail;
use dhs_core::Beacon;
use dhs_core::DataPoint;
use dhs_core::DimensionId;
use dhs_core::IdMapping;
use dhs_core::LodChunkKey;
use dhs_core::LodChunkPayload;
use dhs_core::PayloadError;
use dhs_core::SectionPos;
use log::trace;
use thiserror::Error;

use crate::compat::FormatVariant;
use crate::types::Array16;
use crate::types::Array32;
use crate::wire::deser::Deserialize;
use crate::wire::deser::DeserializeResult;
use crate::wire::deser::Deserializer;
use crate::wire::ser::Serialize;
use crate::wire::ser::SerializeResult;
use crate::wire::ser::Serializer;
use crate::wire::ser::VecSerializer;
use crate::wire::util;

/// Upper bound for an uncompressed payload body.
pub const MAX_PAYLOAD_SIZE: usize = 8 * 1024 * 1024;

/// Bodies smaller than this are sent uncompressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 256;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("unsupported compression flag: {0}")]
    UnsupportedCompression(u8),
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),
    #[error("payload body of {0} bytes exceeds {MAX_PAYLOAD_SIZE} bytes")]
    TooLarge(usize),
    #[error("format version {0} does not fit into the version tag")]
    VersionTagOverflow(u16),
    #[error("compression failed: {0}")]
    CompressionFailed(String),
}

impl CodecError {
    /// Whether this error was caused by the received bytes rather than by the local payload.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::UnsupportedCompression(_))
    }

    fn malformed(error: &anyhow::Error) -> Self {
        Self::Malformed(format!("{error:#}"))
    }
}

/// Compression applied to payload bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Zlib,
    Zstd,
}

impl Compression {
    #[must_use]
    pub const fn flag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Zlib => 1,
            Self::Zstd => 2,
        }
    }

    #[must_use]
    pub const fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(Self::None),
            1 => Some(Self::Zlib),
            2 => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Whether support for this scheme has been compiled in.
    #[must_use]
    pub const fn is_available(self) -> bool {
        match self {
            Self::None => true,
            Self::Zlib => cfg!(feature = "zlib"),
            Self::Zstd => cfg!(feature = "zstd"),
        }
    }

    fn compress(self, body: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::None => Ok(body),
            #[cfg(feature = "zlib")]
            Self::Zlib => Ok(util::compress_zlib(&body)),
            #[cfg(feature = "zstd")]
            Self::Zstd => {
                let mut compressed = Vec::with_capacity(body.len() / 2);
                util::zstd_compress(&body, |chunk| {
                    compressed.extend_from_slice(chunk);
                    Ok(())
                })
                .map_err(|err| CodecError::CompressionFailed(format!("{err:#}")))?;
                Ok(compressed)
            }
            #[cfg(not(all(feature = "zlib", feature = "zstd")))]
            unavailable => Err(CodecError::UnsupportedCompression(unavailable.flag())),
        }
    }

    fn decompress(self, body: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::None => {
                if body.len() > MAX_PAYLOAD_SIZE {
                    return Err(CodecError::Malformed(format!(
                        "body of {} bytes exceeds {MAX_PAYLOAD_SIZE} bytes",
                        body.len()
                    )));
                }
                Ok(body.to_vec())
            }
            #[cfg(feature = "zlib")]
            Self::Zlib => util::decompress_zlib(body, MAX_PAYLOAD_SIZE)
                .map_err(|err| CodecError::malformed(&err)),
            #[cfg(feature = "zstd")]
            Self::Zstd => {
                let mut decompressed = Vec::new();
                let consumed = util::zstd_decompress(body, MAX_PAYLOAD_SIZE, |chunk| {
                    decompressed.extend_from_slice(chunk);
                    Ok(())
                })
                .map_err(|err| CodecError::malformed(&err))?;
                if consumed != body.len() {
                    return Err(CodecError::Malformed(format!(
                        "{} bytes after the zstd frame",
                        body.len() - consumed
                    )));
                }
                Ok(decompressed)
            }
            #[cfg(not(all(feature = "zlib", feature = "zstd")))]
            unavailable => Err(CodecError::UnsupportedCompression(unavailable.flag())),
        }
    }
}

impl Display for Compression {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::None => "none",
            Self::Zlib => "zlib",
            Self::Zstd => "zstd",
        })
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "zlib" => Ok(Self::Zlib),
            "zstd" => Ok(Self::Zstd),
            other => Err(format!("unknown compression: {other}")),
        }
    }
}

/// Width of an integer header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagWidth {
    U8,
    U16,
}

/// Field widths of a format variant.
///
/// The codec only ever consults the layout. Variants never leak into the encoding logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLayout {
    pub version_tag: TagWidth,
}

impl From<FormatVariant> for PayloadLayout {
    fn from(variant: FormatVariant) -> Self {
        match variant {
            FormatVariant::Standard => Self {
                version_tag: TagWidth::U16,
            },
            FormatVariant::ForgeByte => Self {
                version_tag: TagWidth::U8,
            },
        }
    }
}

impl PayloadLayout {
    fn write_version_tag<S: Serializer>(self, version: u16, ser: &mut S) -> SerializeResult {
        match self.version_tag {
            TagWidth::U16 => u16::serialize(&version, ser),
            TagWidth::U8 => {
                let Ok(tag) = u8::try_from(version) else {
                    bail!(CodecError::VersionTagOverflow(version));
                };
                u8::serialize(&tag, ser)
            }
        }
    }

    fn read_version_tag(self, deser: &mut Deserializer<'_>) -> DeserializeResult<u16> {
        match self.version_tag {
            TagWidth::U16 => u16::deserialize(deser),
            TagWidth::U8 => Ok(u16::from(u8::deserialize(deser)?)),
        }
    }
}

/// Encodes a payload with the default compression threshold.
///
/// # Errors
///
/// Fails if the payload is structurally invalid, too large, or cannot be represented by the
/// variant's layout.
pub fn encode(
    payload: &LodChunkPayload,
    variant: FormatVariant,
    compression: Compression,
) -> Result<Vec<u8>, CodecError> {
    encode_with_threshold(
        payload,
        variant,
        compression,
        DEFAULT_COMPRESSION_THRESHOLD,
    )
}

/// Encodes a payload. Bodies below `threshold` bytes and empty payloads stay uncompressed.
///
/// # Errors
///
/// See [`encode`].
pub fn encode_with_threshold(
    payload: &LodChunkPayload,
    variant: FormatVariant,
    compression: Compression,
    threshold: usize,
) -> Result<Vec<u8>, CodecError> {
    payload.validate()?;
    if !compression.is_available() {
        return Err(CodecError::UnsupportedCompression(compression.flag()));
    }
    let layout = PayloadLayout::from(variant);

    let body = serialize_body(payload).map_err(|err| CodecError::malformed(&err))?;
    if body.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::TooLarge(body.len()));
    }
    let compression = if payload.is_empty() || body.len() < threshold {
        Compression::None
    } else {
        compression
    };
    let raw_len = body.len();
    let body = compression.compress(body)?;
    trace!(
        "encoded {} with {compression}: {raw_len} -> {} body bytes",
        payload.key,
        body.len()
    );

    let column_count = u16::try_from(payload.columns.len())
        .map_err(|_err| PayloadError::ColumnCount(payload.columns.len()))?;
    let sample_count =
        u32::try_from(payload.sample_count()).map_err(|_err| CodecError::TooLarge(raw_len))?;

    let header = Header {
        format_version: payload.format_version,
        key: payload.key,
        timestamp: payload.timestamp,
        column_count,
        sample_count,
        compression_flag: compression.flag(),
    };
    let mut ser = VecSerializer::new(body.len() + 32);
    if let Err(err) = write_payload(layout, &header, &body, &mut ser) {
        return Err(match err.downcast::<CodecError>() {
            Ok(codec_error) => codec_error,
            Err(err) => CodecError::malformed(&err),
        });
    }
    Ok(ser.take())
}

fn write_payload<S: Serializer>(
    layout: PayloadLayout,
    header: &Header,
    body: &[u8],
    ser: &mut S,
) -> SerializeResult {
    layout.write_version_tag(header.format_version, ser)?;
    u16::serialize(&header.key.dimension.0, ser)?;
    u64::serialize(&header.key.section.pack(), ser)?;
    i64::serialize(&header.timestamp, ser)?;
    u16::serialize(&header.column_count, ser)?;
    u32::serialize(&header.sample_count, ser)?;
    u8::serialize(&header.compression_flag, ser)?;
    u32::serialize(&u32::try_from(body.len())?, ser)?;
    ser.write_bytes(body)
}

fn serialize_body(payload: &LodChunkPayload) -> anyhow::Result<Vec<u8>> {
    let mut ser = VecSerializer::new(payload.sample_count() * 8 + payload.columns.len() * 2 + 64);
    Array32::<IdMapping>::serialize(&payload.mappings, &mut ser)?;
    for column in &payload.columns {
        Array16::<DataPoint>::serialize(column, &mut ser)?;
    }
    Array16::<Beacon>::serialize(&payload.beacons, &mut ser)?;
    Ok(ser.take())
}

struct Header {
    format_version: u16,
    key: LodChunkKey,
    timestamp: i64,
    column_count: u16,
    sample_count: u32,
    compression_flag: u8,
}

/// Decodes a payload that was encoded with the given variant.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for any structural problem and
/// [`CodecError::UnsupportedCompression`] for unknown or disabled compression schemes.
pub fn decode(bytes: &[u8], variant: FormatVariant) -> Result<LodChunkPayload, CodecError> {
    let layout = PayloadLayout::from(variant);
    let mut deser = Deserializer::new(bytes);

    let header = read_header(layout, &mut deser).map_err(|err| CodecError::malformed(&err))?;
    let Some(compression) = Compression::from_flag(header.compression_flag) else {
        return Err(CodecError::UnsupportedCompression(header.compression_flag));
    };
    if !compression.is_available() {
        return Err(CodecError::UnsupportedCompression(header.compression_flag));
    }

    let body_len = u32::deserialize(&mut deser).map_err(|err| CodecError::malformed(&err))?;
    let body_len =
        usize::try_from(body_len).map_err(|err| CodecError::Malformed(err.to_string()))?;
    if body_len != deser.remaining() {
        return Err(CodecError::Malformed(format!(
            "declared body length {body_len} but {} bytes follow",
            deser.remaining()
        )));
    }
    let body = compression.decompress(deser.take_all())?;

    let (mappings, columns, beacons) = read_body(&body, usize::from(header.column_count))
        .map_err(|err| CodecError::malformed(&err))?;
    let samples: usize = columns.iter().map(Vec::len).sum();
    if u32::try_from(samples).ok() != Some(header.sample_count) {
        return Err(CodecError::Malformed(format!(
            "declared {} samples but found {samples}",
            header.sample_count
        )));
    }

    let payload = LodChunkPayload {
        key: header.key,
        format_version: header.format_version,
        timestamp: header.timestamp,
        mappings,
        columns,
        beacons,
    };
    payload
        .validate()
        .map_err(|err| CodecError::Malformed(err.to_string()))?;
    Ok(payload)
}

fn read_header(layout: PayloadLayout, deser: &mut Deserializer<'_>) -> anyhow::Result<Header> {
    let format_version = layout.read_version_tag(deser)?;
    let dimension = DimensionId(u16::deserialize(deser)?);
    let section = SectionPos::unpack(u64::deserialize(deser)?)?;
    let timestamp = i64::deserialize(deser)?;
    let column_count = u16::deserialize(deser)?;
    if column_count != 0 && usize::from(column_count) != SectionPos::COLUMN_COUNT {
        bail!(PayloadError::ColumnCount(usize::from(column_count)));
    }
    let sample_count = u32::deserialize(deser)?;
    let compression_flag = u8::deserialize(deser)?;
    Ok(Header {
        format_version,
        key: LodChunkKey::new(dimension, section),
        timestamp,
        column_count,
        sample_count,
        compression_flag,
    })
}

type Body = (Vec<IdMapping>, Vec<Vec<DataPoint>>, Vec<Beacon>);

fn read_body(body: &[u8], column_count: usize) -> anyhow::Result<Body> {
    let mut deser = Deserializer::new(body);
    let mappings = Array32::<IdMapping>::deserialize(&mut deser)?;
    let mut columns = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        columns.push(Array16::<DataPoint>::deserialize(&mut deser)?);
    }
    let beacons = Array16::<Beacon>::deserialize(&mut deser)?;
    if deser.has_remaining() {
        bail!("{} trailing bytes in payload body", deser.remaining());
    }
    Ok((mappings, columns, beacons))
}
