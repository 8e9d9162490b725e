//! Derives LOD data from per-block queries.
//!
//! Every column is sampled at its lowest corner. The air above the surface becomes a single
//! run, everything below is walked top-down and equal materials are merged, until a few blocks
//! below the first solid ground.

use std::collections::HashMap;

use anyhow::Result;
use dhs_core::Beacon;
use dhs_core::DataPoint;
use dhs_core::DimensionId;
use dhs_core::IdMapping;
use dhs_core::LodChunkKey;
use dhs_core::LodColumn;
use dhs_core::SectionPos;
use flexstr::SharedStr;
use glam::I64Vec2;
use log::trace;

use super::DimensionInfo;
use super::RawLod;
use super::WorldDataProvider;

pub const AIR: &str = "minecraft:air";

/// Blocks scanned below the first solid ground (or below sea level, whichever is lower).
const SCAN_BELOW_GROUND: i32 = 10;

const SOLID_GROUND: [&str; 8] = [
    "minecraft:stone",
    "minecraft:grass_block",
    "minecraft:dirt",
    "minecraft:gravel",
    "minecraft:sand",
    "minecraft:sandstone",
    "minecraft:mycelium",
    "minecraft:netherrack",
];

/// Block-level queries a host answers for the [`LodBuilder`].
pub trait ColumnSource: Send + Sync {
    fn dimension(&self, id: DimensionId) -> Option<DimensionInfo>;

    /// Whether the host has any data for the section. Ungenerated sections yield no LOD.
    fn is_generated(&self, _key: &LodChunkKey) -> bool {
        true
    }

    /// Y of the top-most non-air block, or anything below `min_y` for an empty column.
    fn highest_y(&self, dimension: DimensionId, block: I64Vec2) -> i32;

    fn biome(&self, dimension: DimensionId, block: I64Vec2) -> SharedStr;

    /// The block state at the given position.
    fn material(&self, dimension: DimensionId, block: I64Vec2, y: i32) -> SharedStr;

    /// Sky and block light at the given position.
    fn light(&self, _dimension: DimensionId, _block: I64Vec2, _y: i32) -> (u8, u8) {
        (DataPoint::MAX_LIGHT, 0)
    }

    fn beacons(&self, _key: &LodChunkKey) -> Vec<Beacon> {
        Vec::new()
    }

    /// Last modification of the section in seconds since the unix epoch.
    fn last_modified(&self, key: &LodChunkKey) -> i64;
}

/// Turns any [`ColumnSource`] into a [`WorldDataProvider`].
pub struct LodBuilder<Source: ColumnSource> {
    source: Source,
}

impl<Source: ColumnSource> LodBuilder<Source> {
    #[must_use]
    pub fn new(source: Source) -> Self {
        Self { source }
    }

    pub fn build(&self, key: &LodChunkKey, dimension: &DimensionInfo) -> Result<RawLod> {
        let mut mappings = MappingTable::default();
        let columns = (0..SectionPos::COLUMN_COUNT)
            .map(|index| {
                let block = key.section.column_origin(index);
                self.build_column(key.dimension, dimension, block, &mut mappings)
            })
            .collect::<Result<Vec<_>>>()?;

        trace!(
            "built {key}: {} mappings, {} data points",
            mappings.mappings.len(),
            columns.iter().map(Vec::len).sum::<usize>()
        );

        Ok(RawLod {
            timestamp: self.source.last_modified(key),
            mappings: mappings.mappings,
            columns,
            beacons: self.source.beacons(key),
        })
    }

    fn build_column(
        &self,
        dimension_id: DimensionId,
        dimension: &DimensionInfo,
        block: I64Vec2,
        mappings: &mut MappingTable,
    ) -> Result<LodColumn> {
        let top = self
            .source
            .highest_y(dimension_id, block)
            .clamp(dimension.min_y - 1, dimension.max_y - 1);
        let biome = self.source.biome(dimension_id, block);

        let mut column = LodColumn::new();
        if top + 1 < dimension.max_y {
            let (sky_light, block_light) = self.source.light(dimension_id, block, top + 1);
            let sky = Run {
                mapping_id: mappings.id(&biome, &SharedStr::from_borrowed(AIR)),
                top: dimension.max_y - 1,
                bottom: top + 1,
                sky_light,
                block_light,
            };
            column.push(sky.to_data_point()?);
        }

        let mut floor = dimension.min_y;
        let mut found_ground = false;
        let mut current: Option<Run> = None;
        for y in (floor..=top).rev() {
            if y < floor {
                break;
            }
            let material = self.source.material(dimension_id, block, y);
            if !found_ground && SOLID_GROUND.contains(&&*material) {
                found_ground = true;
                let scan_to = (y - SCAN_BELOW_GROUND).min(dimension.sea_level - SCAN_BELOW_GROUND);
                floor = floor.max(scan_to);
            }

            let mapping_id = mappings.id(&biome, &material);
            match &mut current {
                Some(run) if run.mapping_id == mapping_id => run.bottom = y,
                _ => {
                    if let Some(run) = current.take() {
                        column.push(run.to_data_point()?);
                    }
                    let light_y = (y + 1).min(dimension.max_y - 1);
                    let (sky_light, block_light) = self.source.light(dimension_id, block, light_y);
                    current = Some(Run {
                        mapping_id,
                        top: y,
                        bottom: y,
                        sky_light,
                        block_light,
                    });
                }
            }
        }
        if let Some(run) = current {
            column.push(run.to_data_point()?);
        }
        Ok(column)
    }
}

impl<Source: ColumnSource> WorldDataProvider for LodBuilder<Source> {
    fn dimension(&self, id: DimensionId) -> Option<DimensionInfo> {
        self.source.dimension(id)
    }

    fn load_lod(&self, key: &LodChunkKey) -> Result<Option<RawLod>> {
        let Some(dimension) = self.source.dimension(key.dimension) else {
            return Ok(None);
        };
        if !self.source.is_generated(key) {
            return Ok(None);
        }
        self.build(key, &dimension).map(Some)
    }
}

/// A vertical run of one material, `bottom..=top`.
struct Run {
    mapping_id: u32,
    top: i32,
    bottom: i32,
    sky_light: u8,
    block_light: u8,
}

impl Run {
    fn to_data_point(&self) -> Result<DataPoint> {
        let height = u16::try_from(self.top - self.bottom + 1)?;
        let start_y = i16::try_from(self.bottom)?;
        Ok(DataPoint::new(
            self.mapping_id,
            height,
            start_y,
            self.sky_light,
            self.block_light,
        )?)
    }
}

#[derive(Default)]
struct MappingTable {
    ids: HashMap<(SharedStr, SharedStr), u32>,
    mappings: Vec<IdMapping>,
}

impl MappingTable {
    fn id(&mut self, biome: &SharedStr, block_state: &SharedStr) -> u32 {
        let next_id = u32::try_from(self.mappings.len()).unwrap_or(u32::MAX);
        let mappings = &mut self.mappings;
        *self
            .ids
            .entry((biome.clone(), block_state.clone()))
            .or_insert_with(|| {
                mappings.push(IdMapping::new(&**biome, &**block_state));
                next_id
            })
    }
}
