//! NetBeacon Controller Library
//!
//! Core functionality for the NetBeacon fleet controller:
//! - SQLite storage for agents, telemetry, the speed-test queue, and share tokens
//! - PSK and Ed25519 signed-request authentication
//! - Typed telemetry dispatch through per-kind probe handlers
//! - Connection hubs for agent streams and watch fan-out
//! - gRPC services (Bootstrap, Agent, Watch)

pub mod auth;
pub mod dispatch;
pub mod hub;
pub mod queue;
pub mod server;
pub mod storage;
