//! Wire protocol of the DH Support bridge
//!
//! - [`codec`] turns [`LodChunkPayload`](dhs_core::LodChunkPayload)s into bytes and back
//! - [`compat`] decides which payload layout a server/protocol combination uses
//! - [`commands`] is the message set exchanged with the client mod
//! - [`peer`] and [`services`] move framed commands over TCP or in-memory pipes

#![expect(
    missing_docs,
    clippy::missing_errors_doc,
    reason = "//TODO document the command set"
)]

pub mod codec;
pub mod commands;
pub mod compat;
pub mod peer;
pub mod services;
pub mod types;
pub mod wire;

pub use codec::CodecError;
pub use codec::Compression;
pub use codec::decode;
pub use codec::encode;
pub use compat::CompatibilityTable;
pub use compat::FormatVariant;
pub use peer::PeerError;
pub use services::client::DhsClient;
pub use services::conn::DhsConnection;
pub use services::server::DhsServer;
