//! REST surface of the authority: wire types, the axum server, and the
//! client used by the CLI.

pub mod client;
pub mod server;
pub mod types;
