use std::ops::Deref;

use anyhow::bail;
use dhs_core::DimensionId;
use dhs_core::LodChunkKey;
use dhs_core::SectionError;
use dhs_core::SectionPos;

use super::CommandDirection;
use super::CommandProperties;
use crate::types::Capabilities;
use crate::wire::deser::Deserialize;
use crate::wire::deser::DeserializeError;
use crate::wire::deser::DeserializeResult;
use crate::wire::deser::Deserializer;
use crate::wire::ser::Serialize;
use crate::wire::ser::SerializeResult;
use crate::wire::ser::Serializer;

define_protocol!(ToServer, ToServerCommand => {
    Hello, 0x01 => HelloSpec,
    LodRequest, 0x02 => LodRequestSpec,
    CancelRequest, 0x03 => CancelRequestSpec,
    Goodbye, 0x04 => GoodbyeSpec
});

wire_struct! {
    /// First message of every session. Announces the protocol range the client speaks.
    pub struct HelloSpec {
        pub min_protocol_version: u16,
        pub max_protocol_version: u16,
        pub capabilities: Capabilities,
    }
}

wire_struct! {
    /// Asks for the LOD data of one section.
    pub struct LodRequestSpec {
        /// chosen by the client, unique among its in-flight requests
        pub request_id: u32,
        pub dimension: u16,
        /// packed [`SectionPos`]
        pub section: u64,
        /// timestamp of the client's cached copy, if it has one
        pub client_timestamp: Option<i64>,
    }
}

impl LodRequestSpec {
    #[must_use]
    pub fn new(request_id: u32, key: LodChunkKey, client_timestamp: Option<i64>) -> Self {
        Self {
            request_id,
            dimension: key.dimension.0,
            section: key.section.pack(),
            client_timestamp,
        }
    }

    /// Unpacks the requested key.
    pub fn key(&self) -> Result<LodChunkKey, SectionError> {
        Ok(LodChunkKey::new(
            DimensionId(self.dimension),
            SectionPos::unpack(self.section)?,
        ))
    }
}

wire_struct! {
    pub struct CancelRequestSpec {
        pub request_id: u32,
    }
}

wire_struct! {
    pub struct GoodbyeSpec {
        pub reason: String,
    }
}
