//! Access to the host's world data.

pub mod builder;
pub mod cache;
pub mod flat;

use anyhow::Result;
use dhs_core::Beacon;
use dhs_core::DimensionId;
use dhs_core::IdMapping;
use dhs_core::LodChunkKey;
use dhs_core::LodChunkPayload;
use dhs_core::LodColumn;
use flexstr::SharedStr;

/// Static properties of a dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionInfo {
    /// The user-facing name of the world; per-world settings are looked up by it
    pub name: SharedStr,
    /// lowest block y
    pub min_y: i32,
    /// one above the highest block y
    pub max_y: i32,
    pub sea_level: i32,
}

/// LOD data of one section as delivered by a provider, before it's tied to a session's format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLod {
    /// last modification in seconds since the unix epoch
    pub timestamp: i64,
    pub mappings: Vec<IdMapping>,
    pub columns: Vec<LodColumn>,
    pub beacons: Vec<Beacon>,
}

impl RawLod {
    #[must_use]
    pub fn into_payload(self, key: LodChunkKey, format_version: u16) -> LodChunkPayload {
        let Self {
            timestamp,
            mappings,
            columns,
            beacons,
        } = self;
        LodChunkPayload {
            key,
            format_version,
            timestamp,
            mappings,
            columns,
            beacons,
        }
    }
}

/// Read-only access to the world data of the host server.
///
/// Implementations are called from scheduler threads and may block.
pub trait WorldDataProvider: Send + Sync {
    fn dimension(&self, id: DimensionId) -> Option<DimensionInfo>;

    /// Loads the LOD data of a section.
    /// Returns `None`, if no data exists for it (e.g. it hasn't been generated yet).
    fn load_lod(&self, key: &LodChunkKey) -> Result<Option<RawLod>>;
}
