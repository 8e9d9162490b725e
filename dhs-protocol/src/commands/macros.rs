macro_rules! as_item {
    ($i:item) => {
        $i
    };
}

/// Picks the wire representation of a field: the explicit one if given, the field type otherwise.
macro_rules! wire_type {
    ($field_ty: ty) => {
        $field_ty
    };
    ($field_ty: ty, $wire_ty: ty) => {
        $wire_ty
    };
}

/// Declares a struct whose fields are (de)serialized in declaration order.
///
/// A field may name a wrapper type with `as` (e.g. `pub data: Vec<u8> as BinaryData32`) to
/// select a wire representation other than the field's own `Serialize` impl.
macro_rules! wire_struct {
    ($(#[$meta: meta])*
     pub struct $name: ident {
         $($(#[$field_meta: meta])* pub $field: ident: $field_ty: ty $(as $wire_ty: ty)?),+ $(,)?
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $($(#[$field_meta])* pub $field: $field_ty),+
        }

        as_item! {
            impl Serialize for $name {
                type Input = Self;
                fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
                    $(
                        <wire_type!($field_ty $(, $wire_ty)?) as Serialize>::serialize(&value.$field, ser)?;
                    )+
                    Ok(())
                }
            }
        }

        as_item! {
            impl Deserialize for $name {
                type Output = Self;
                fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
                    log::trace!(concat!("deserializing ", stringify!($name)));
                    $(
                        let $field = <wire_type!($field_ty $(, $wire_ty)?) as Deserialize>::deserialize(deser)?;
                    )+
                    Ok(Self { $($field),+ })
                }
            }
        }
    };
}

macro_rules! implicit_from {
    ($command_ty: ident, $name: ident, $spec_ty: ident) => {
        impl From<$spec_ty> for $command_ty {
            fn from(value: $spec_ty) -> Self {
                $command_ty::$name(Box::new(value))
            }
        }
    };
}

macro_rules! define_protocol {
    ($dir: ident,
     $command_ty: ident => {
         $($name: ident, $id: literal => $spec_ty: ident),*
    }) => {
        as_item! {
            #[derive(Debug, PartialEq, Clone)]
            pub enum $command_ty {
                $($name(Box<$spec_ty>)),*,
            }
        }

        as_item! {
            impl CommandProperties for $command_ty {
                fn direction(&self) -> CommandDirection {
                    CommandDirection::$dir
                }

                fn command_id(&self) -> u8 {
                    match self {
                        $($command_ty::$name(_) => $id),*,
                    }
                }

                fn command_name(&self) -> &'static str {
                    match self {
                        $($command_ty::$name(_) => stringify!($name)),*,
                    }
                }
            }
        }

        as_item! {
            impl Serialize for $command_ty {
                type Input = Self;
                fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
                    match value {
                        $($command_ty::$name(spec) => {
                            u8::serialize(&$id, ser)?;
                            anyhow::Context::context(<$spec_ty as Serialize>::serialize(Deref::deref(spec), ser), stringify!($name))
                        }),*,
                    }
                }
            }
        }

        as_item! {
            impl Deserialize for $command_ty {
                type Output = Self;
                fn deserialize(deserializer: &mut Deserializer<'_>) -> DeserializeResult<Self::Output> {
                    let command_id = u8::deserialize(deserializer)?;
                    let result = match command_id {
                        $( $id => $command_ty::$name(Box::new(anyhow::Context::context(<$spec_ty as Deserialize>::deserialize(deserializer), stringify!($name))?)) ),*,
                        _ => bail!(DeserializeError::BadCommandId(command_id)),
                    };
                    // newer peers may append fields we don't know about yet
                    if deserializer.has_remaining() {
                        log::warn!("left-over bytes after deserialization of {}: {:?}", result.command_name(), deserializer.peek_all());
                    }
                    Ok(result)
                }
            }
        }

        $(implicit_from!($command_ty, $name, $spec_ty);)*
    };
}
