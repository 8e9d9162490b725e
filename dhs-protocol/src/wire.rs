//! Low level (de)serialization building blocks shared by the codec and the command set.

pub mod deser;
pub mod ser;
pub mod util;
