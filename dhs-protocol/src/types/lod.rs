//! Wire layout of the building blocks of a LOD payload body.

use dhs_core::Beacon;
use dhs_core::DataPoint;
use dhs_core::IdMapping;

use crate::wire::{
    deser::{Deserialize, DeserializeResult, Deserializer},
    ser::{Serialize, SerializeResult, Serializer},
};

impl Serialize for DataPoint {
    type Input = Self;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        u64::serialize(&value.raw(), ser)
    }
}

impl Deserialize for DataPoint {
    type Output = Self;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        Ok(Self::from_raw(u64::deserialize(deser)?))
    }
}

impl Serialize for IdMapping {
    type Input = Self;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        String::serialize(&value.biome, ser)?;
        String::serialize(&value.block_state, ser)
    }
}

impl Deserialize for IdMapping {
    type Output = Self;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        let biome = String::deserialize(deser)?;
        let block_state = String::deserialize(deser)?;
        Ok(Self { biome, block_state })
    }
}

impl Serialize for Beacon {
    type Input = Self;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        i32::serialize(&value.x, ser)?;
        i32::serialize(&value.y, ser)?;
        i32::serialize(&value.z, ser)?;
        u32::serialize(&value.color, ser)
    }
}

impl Deserialize for Beacon {
    type Output = Self;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        Ok(Self {
            x: i32::deserialize(deser)?,
            y: i32::deserialize(deser)?,
            z: i32::deserialize(deser)?,
            color: u32::deserialize(deser)?,
        })
    }
}
