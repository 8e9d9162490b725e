//! Wire representations used inside of commands and LOD payloads.
//!
//! Wrapper types (`Array16`, `BinaryData32`, ...) carry no data themselves. They select how a
//! plain Rust value is laid out on the wire, e.g. `Array16<u64>` (de)serializes a `Vec<u64>`
//! with a `u16` length prefix.

mod arrays;
mod binary;
mod lod;
mod negotiation;
mod options;
mod primitives;
mod strings;

pub use arrays::*;
pub use binary::*;
pub use negotiation::*;
pub use options::*;
