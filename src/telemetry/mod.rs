//! Observer-facing telemetry: request/response protocol, WebSocket server,
//! and the dashboard's static file server.

pub mod protocol;
pub mod server;
pub mod static_files;
