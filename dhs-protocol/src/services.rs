pub mod client;
pub mod conn;
pub mod server;
