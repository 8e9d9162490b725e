use std::marker::PhantomData;

use crate::wire::{
    deser::{Deserialize, DeserializeResult, Deserializer},
    ser::{Serialize, SerializeResult, Serializer},
};

macro_rules! length_prefixed_array {
    ($(#[$meta: meta])* $name: ident, $len_ty: ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name<T>(PhantomData<T>);

        impl<T: Serialize> Serialize for $name<T>
        where
            <T as Serialize>::Input: Sized,
        {
            type Input = Vec<T::Input>;
            fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
                <$len_ty>::serialize(&<$len_ty>::try_from(value.len())?, ser)?;
                for item in value {
                    <T as Serialize>::serialize(item, ser)?;
                }
                Ok(())
            }
        }

        impl<T: Deserialize> Deserialize for $name<T> {
            type Output = Vec<T::Output>;
            fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self::Output> {
                let length = usize::try_from(<$len_ty>::deserialize(deser)?)?;
                // every item occupies at least one byte
                let mut vec = Vec::with_capacity(length.min(deser.remaining()));
                for _ in 0..length {
                    vec.push(<T as Deserialize>::deserialize(deser)?);
                }
                Ok(vec)
            }
        }
    };
}

length_prefixed_array!(
    /// An array of items with a u16 length prefix
    Array16,
    u16
);
length_prefixed_array!(
    /// An array of items with a u32 length prefix
    Array32,
    u32
);
