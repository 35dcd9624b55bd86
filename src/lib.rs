// Ginga - single-instance background streaming server
// Library exports

pub mod config;
pub mod daemon; // Lock file, stale-instance replacement, detached spawn
pub mod errors;
pub mod server; // HTTP streaming endpoint and graceful shutdown
