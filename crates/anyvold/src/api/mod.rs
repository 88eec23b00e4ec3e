//! HTTP transport for the volume plugin protocol.

pub mod server;
