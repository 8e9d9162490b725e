use anyhow::bail;

use crate::wire::{
    deser::{Deserialize, DeserializeError, DeserializeResult, Deserializer},
    ser::{Serialize, SerializeResult, Serializer},
};

impl Serialize for bool {
    type Input = Self;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        ser.write_bytes(&[u8::from(*value)])
    }
}

impl Deserialize for bool {
    type Output = Self;
    fn deserialize(deserializer: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        let [byte] = deserializer.take_n::<1>()?;
        Ok(match byte {
            0 => false,
            1 => true,
            _ => bail!(DeserializeError::InvalidValue(format!("Invalid bool: {byte}"))),
        })
    }
}

/// All integers are transferred in network byte order.
macro_rules! big_endian {
    ($($int: ty),*) => {
        $(
            impl Serialize for $int {
                type Input = Self;
                fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
                    ser.write_bytes(&value.to_be_bytes())
                }
            }

            impl Deserialize for $int {
                type Output = Self;
                fn deserialize(deserializer: &mut Deserializer<'_>) -> DeserializeResult<Self> {
                    Ok(<$int>::from_be_bytes(
                        deserializer.take_n::<{ size_of::<$int>() }>()?,
                    ))
                }
            }
        )*
    };
}

big_endian!(u8, u16, u32, u64, i8, i16, i32, i64);

#[cfg(test)]
mod tests {
    use crate::wire::ser::VecSerializer;

    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut ser = VecSerializer::new(16);
        u16::serialize(&0x0102, &mut ser).unwrap();
        i32::serialize(&-2, &mut ser).unwrap();
        u64::serialize(&0x0A0B_0C0D_0E0F_1011, &mut ser).unwrap();
        let bytes = ser.take();
        assert_eq!(
            bytes,
            vec![
                0x01, 0x02, 0xFF, 0xFF, 0xFF, 0xFE, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11
            ]
        );

        let mut deser = Deserializer::new(&bytes);
        assert_eq!(u16::deserialize(&mut deser).unwrap(), 0x0102);
        assert_eq!(i32::deserialize(&mut deser).unwrap(), -2);
        assert_eq!(u64::deserialize(&mut deser).unwrap(), 0x0A0B_0C0D_0E0F_1011);
    }

    #[test]
    fn rejects_invalid_bool() {
        let mut deser = Deserializer::new(&[2]);
        assert!(bool::deserialize(&mut deser).is_err());
    }
}
