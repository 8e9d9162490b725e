//! Re-exports all libraries of the DH Support bridge.

pub use dhs_core as core;
pub use dhs_protocol as protocol;
pub use dhs_server as server;
