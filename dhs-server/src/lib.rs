//! Serves Distant Horizons LOD data from a host's world over the DH Support protocol
//!
//! - [`config`] reads and validates the bridge settings
//! - [`world`] turns the host's columns into LOD sections
//! - [`scheduling`] runs the world work on the host's threading model
//! - [`session`] drives one client from handshake to goodbye
//! - [`server`] accepts connections and owns the shared state

#![expect(
    missing_docs,
    clippy::missing_errors_doc,
    reason = "//TODO document the public API"
)]

pub mod config;
pub mod scheduling;
pub mod server;
pub mod session;
pub mod stats;
pub mod world;

pub use server::BridgeServer;
