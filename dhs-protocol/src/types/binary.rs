use crate::wire::{
    deser::{Deserialize, DeserializeResult, Deserializer},
    ser::{Serialize, SerializeResult, Serializer},
};

/// Raw bytes with a 32-bit length prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryData32;

impl Serialize for BinaryData32 {
    type Input = Vec<u8>;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        u32::serialize(&u32::try_from(value.len())?, ser)?;
        ser.write_bytes(value)?;
        Ok(())
    }
}

impl Deserialize for BinaryData32 {
    type Output = Vec<u8>;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self::Output> {
        let num_bytes = usize::try_from(u32::deserialize(deser)?)?;
        Ok(Vec::from(deser.take(num_bytes)?))
    }
}
