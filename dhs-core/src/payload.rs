//! The LOD payload: everything a client needs to render one section.

use thiserror::Error;

use crate::{data_point::DataPoint, section::LodChunkKey, section::SectionPos};

/// Structural problems of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload holds {0} columns, expected 0 or {count}", count = SectionPos::COLUMN_COUNT)]
    ColumnCount(usize),
    #[error("column {column} refers to mapping {mapping_id} but only {mappings} exist")]
    UnknownMapping {
        column: usize,
        mapping_id: u32,
        mappings: usize,
    },
}

/// Describes the material a data point refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdMapping {
    pub biome: String,
    pub block_state: String,
}

impl IdMapping {
    #[must_use]
    pub fn new(biome: impl Into<String>, block_state: impl Into<String>) -> Self {
        Self {
            biome: biome.into(),
            block_state: block_state.into(),
        }
    }
}

/// A beacon beam within a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Beacon {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// beam color as `0x00RRGGBB`
    pub color: u32,
}

/// The data points of a single column, ordered top-down.
pub type LodColumn = Vec<DataPoint>;

/// A complete LOD section as exchanged between bridge and client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LodChunkPayload {
    pub key: LodChunkKey,
    /// payload format version, equal to the negotiated protocol version
    pub format_version: u16,
    /// last modification in seconds since the unix epoch
    pub timestamp: i64,
    pub mappings: Vec<IdMapping>,
    /// either empty (no data) or exactly [`SectionPos::COLUMN_COUNT`] columns
    pub columns: Vec<LodColumn>,
    pub beacons: Vec<Beacon>,
}

impl LodChunkPayload {
    /// Creates a payload that carries no data for the given key.
    #[must_use]
    pub fn empty(key: LodChunkKey, format_version: u16, timestamp: i64) -> Self {
        Self {
            key,
            format_version,
            timestamp,
            mappings: Vec::new(),
            columns: Vec::new(),
            beacons: Vec::new(),
        }
    }

    /// Returns `true` if this payload carries no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Total number of data points over all columns.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    /// Checks the column count and that every data point refers to an existing mapping.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found.
    pub fn validate(&self) -> Result<(), PayloadError> {
        let column_count = self.columns.len();
        if column_count != 0 && column_count != SectionPos::COLUMN_COUNT {
            return Err(PayloadError::ColumnCount(column_count));
        }

        let mappings = self.mappings.len();
        for (column, points) in self.columns.iter().enumerate() {
            if let Some(point) = points
                .iter()
                .find(|point| !usize::try_from(point.mapping_id()).is_ok_and(|id| id < mappings))
            {
                return Err(PayloadError::UnknownMapping {
                    column,
                    mapping_id: point.mapping_id(),
                    mappings,
                });
            }
        }
        Ok(())
    }
}
