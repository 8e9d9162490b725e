use anyhow::bail;

use crate::wire::{
    deser::{Deserialize, DeserializeError, DeserializeResult, Deserializer},
    ser::{Serialize, SerializeResult, Serializer},
};

/// str implements Serialize but not Deserialize
impl Serialize for str {
    type Input = Self;

    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        u16::serialize(&u16::try_from(value.len())?, ser)?;
        ser.write_bytes(value.as_bytes())
    }
}

impl Serialize for String {
    type Input = Self;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        <str as Serialize>::serialize(value, ser)
    }
}

impl Deserialize for String {
    type Output = Self;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        let num_bytes = usize::from(u16::deserialize(deser)?);
        match std::str::from_utf8(deser.take(num_bytes)?) {
            Ok(str) => Ok(str.into()),
            Err(error) => bail!(DeserializeError::InvalidValue(error.to_string())),
        }
    }
}
