#![forbid(unsafe_code)]

//! Shared test utilities for the segflow workspace.

pub mod fixtures;
pub mod http_server;
pub mod media_server;

pub use fixtures::*;
pub use http_server::TestHttpServer;
pub use media_server::{MediaServer, MediaServerBuilder};
