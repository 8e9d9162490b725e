use std::marker::PhantomData;

use anyhow::bail;

use crate::wire::{
    deser::{Deserialize, DeserializeError, DeserializeResult, Deserializer},
    ser::{Serialize, SerializeResult, Serializer},
};

/// Option is used for optional values at the end of a structure.
/// Once Option is used, all following must be Option as well.
impl<T: Serialize> Serialize for Option<T>
where
    <T as Serialize>::Input: Sized,
{
    type Input = Option<T::Input>;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        match value {
            Some(value) => <T as Serialize>::serialize(value, ser),
            None => Ok(()),
        }
    }
}

impl<T: Deserialize> Deserialize for Option<T> {
    type Output = Option<T::Output>;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self::Output> {
        if deser.has_remaining() {
            Ok(Some(<T as Deserialize>::deserialize(deser)?))
        } else {
            Ok(None)
        }
    }
}

/// An optional value preceded by a presence flag.
/// Unlike Option, this can appear anywhere in the message.
#[derive(Debug, Clone, PartialEq)]
pub struct Flagged<T>(PhantomData<T>);

impl<T: Serialize> Serialize for Flagged<T>
where
    <T as Serialize>::Input: Sized,
{
    type Input = Option<T::Input>;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        match value {
            None => u8::serialize(&0, ser),
            Some(value) => {
                u8::serialize(&1, ser)?;
                <T as Serialize>::serialize(value, ser)
            }
        }
    }
}

impl<T: Deserialize> Deserialize for Flagged<T> {
    type Output = Option<T::Output>;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self::Output> {
        match u8::deserialize(deser)? {
            0 => Ok(None),
            1 => Ok(Some(<T as Deserialize>::deserialize(deser)?)),
            flag => bail!(DeserializeError::InvalidValue(format!(
                "Invalid presence flag: {flag}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::wire::ser::VecSerializer;

    use super::*;

    #[test]
    fn trailing_option_depends_on_remaining_bytes() {
        let mut ser = VecSerializer::new(8);
        Option::<i64>::serialize(&None, &mut ser).unwrap();
        assert!(ser.is_empty());

        let mut deser = Deserializer::new(&[0, 0, 0, 0, 0, 0, 0, 9]);
        assert_eq!(Option::<i64>::deserialize(&mut deser).unwrap(), Some(9));
        assert_eq!(Option::<i64>::deserialize(&mut deser).unwrap(), None);
    }

    #[test]
    fn flagged_value() {
        let mut ser = VecSerializer::new(8);
        Flagged::<u16>::serialize(&Some(5), &mut ser).unwrap();
        Flagged::<u16>::serialize(&None, &mut ser).unwrap();
        let bytes = ser.take();
        assert_eq!(bytes, vec![1, 0, 5, 0]);
        let mut deser = Deserializer::new(&bytes);
        assert_eq!(Flagged::<u16>::deserialize(&mut deser).unwrap(), Some(5));
        assert_eq!(Flagged::<u16>::deserialize(&mut deser).unwrap(), None);
    }
}
