use dhs_core::Beacon;
use dhs_core::DimensionId;
use dhs_core::LodChunkKey;
use flexstr::SharedStr;
use glam::I64Vec2;

use super::DimensionInfo;
use super::builder::AIR;
use super::builder::ColumnSource;

/// A superflat demo world: bedrock, stone, three layers of dirt and grass on top.
///
/// Optionally only sections within `generated_radius` blocks of the origin count as generated.
pub struct FlatColumns {
    dimensions: Vec<DimensionInfo>,
    surface_y: i32,
    generated_radius: Option<i64>,
    timestamp: i64,
}

impl FlatColumns {
    #[must_use]
    pub fn new(dimensions: Vec<DimensionInfo>, surface_y: i32, timestamp: i64) -> Self {
        Self {
            dimensions,
            surface_y,
            generated_radius: None,
            timestamp,
        }
    }

    #[must_use]
    pub fn with_generated_radius(mut self, radius: i64) -> Self {
        self.generated_radius = Some(radius);
        self
    }

    /// An overworld (`world`) and a nether (`world_nether`).
    #[must_use]
    pub fn demo(timestamp: i64) -> Self {
        Self::new(
            vec![
                DimensionInfo {
                    name: SharedStr::from_borrowed("world"),
                    min_y: -64,
                    max_y: 320,
                    sea_level: 62,
                },
                DimensionInfo {
                    name: SharedStr::from_borrowed("world_nether"),
                    min_y: 0,
                    max_y: 128,
                    sea_level: 32,
                },
            ],
            -60,
            timestamp,
        )
    }
}

impl ColumnSource for FlatColumns {
    fn dimension(&self, id: DimensionId) -> Option<DimensionInfo> {
        self.dimensions.get(usize::from(id.0)).cloned()
    }

    fn is_generated(&self, key: &LodChunkKey) -> bool {
        let Some(radius) = self.generated_radius else {
            return true;
        };
        let origin = key.section.origin_block();
        let far_corner = origin + I64Vec2::splat(key.section.width_blocks());
        // generated if the section overlaps the square around the origin
        origin.x < radius && origin.y < radius && far_corner.x > -radius && far_corner.y > -radius
    }

    fn highest_y(&self, dimension: DimensionId, _block: I64Vec2) -> i32 {
        match self.dimension(dimension) {
            Some(info) => self.surface_y.clamp(info.min_y, info.max_y - 1),
            None => i32::MIN,
        }
    }

    fn biome(&self, _dimension: DimensionId, _block: I64Vec2) -> SharedStr {
        SharedStr::from_borrowed("minecraft:plains")
    }

    fn material(&self, dimension: DimensionId, _block: I64Vec2, y: i32) -> SharedStr {
        let min_y = self.dimension(dimension).map_or(0, |info| info.min_y);
        let surface_y = self.highest_y(dimension, I64Vec2::ZERO);
        SharedStr::from_borrowed(if y > surface_y {
            AIR
        } else if y == surface_y {
            "minecraft:grass_block"
        } else if y >= surface_y - 3 {
            "minecraft:dirt"
        } else if y == min_y {
            "minecraft:bedrock"
        } else {
            "minecraft:stone"
        })
    }

    fn beacons(&self, key: &LodChunkKey) -> Vec<Beacon> {
        // a single beacon marks the world origin
        let origin = key.section.origin_block();
        let width = key.section.width_blocks();
        let contains_origin = (origin.x..origin.x + width).contains(&0)
            && (origin.y..origin.y + width).contains(&0);
        if contains_origin {
            vec![Beacon {
                x: 0,
                y: self.surface_y + 1,
                z: 0,
                color: 0x00FF_FFFF,
            }]
        } else {
            Vec::new()
        }
    }

    fn last_modified(&self, _key: &LodChunkKey) -> i64 {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use dhs_core::DetailLevel;
    use dhs_core::SectionPos;

    use super::*;
    use crate::world::WorldDataProvider;
    use crate::world::builder::LodBuilder;

    #[test]
    fn superflat_columns() {
        let builder = LodBuilder::new(FlatColumns::demo(42));
        let section = SectionPos::new(DetailLevel::new(3).unwrap(), 4, -2).unwrap();
        let key = LodChunkKey::new(DimensionId(0), section);
        let lod = builder.load_lod(&key).unwrap().unwrap();
        assert_eq!(lod.timestamp, 42);
        assert_eq!(lod.columns.len(), SectionPos::COLUMN_COUNT);
        assert!(lod.beacons.is_empty());
        for column in &lod.columns {
            let runs: Vec<_> = column
                .iter()
                .map(|point| (point.start_y(), point.height()))
                .collect();
            // air, grass, dirt and the bedrock floor
            assert_eq!(runs, vec![(-59, 379), (-60, 1), (-63, 3), (-64, 1)]);
        }
    }

    #[test]
    fn generated_radius_and_beacon() {
        let builder = LodBuilder::new(FlatColumns::demo(0).with_generated_radius(1000));
        let detail = DetailLevel::new(2).unwrap();

        let center = SectionPos::new(detail, -1, 0).unwrap();
        let lod = builder
            .load_lod(&LodChunkKey::new(DimensionId(0), center))
            .unwrap();
        assert!(lod.is_some_and(|lod| lod.beacons.is_empty()));

        let origin = SectionPos::new(detail, 0, 0).unwrap();
        let lod = builder
            .load_lod(&LodChunkKey::new(DimensionId(0), origin))
            .unwrap()
            .unwrap();
        assert_eq!(lod.beacons.len(), 1);

        // 256 blocks per section: section 4 starts at block 1024
        let far = SectionPos::new(detail, 4, 0).unwrap();
        assert_eq!(
            builder
                .load_lod(&LodChunkKey::new(DimensionId(0), far))
                .unwrap(),
            None
        );
        let nether = LodChunkKey::new(DimensionId(1), origin);
        assert!(builder.load_lod(&nether).unwrap().is_some());
        let unknown = LodChunkKey::new(DimensionId(2), origin);
        assert_eq!(builder.load_lod(&unknown).unwrap(), None);
    }
}
