//! Contains the core types shared by the protocol and the server: section and region
//! positions, packed data points and the LOD payload they are assembled into.

mod data_point;
mod dimension;
mod payload;
mod region;
mod section;

pub use data_point::*;
pub use dimension::*;
pub use payload::*;
pub use region::*;
pub use section::*;
