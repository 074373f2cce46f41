//! NetBeacon Protocol Buffers
//!
//! Generated protobuf code for the NetBeacon gRPC API.
//!
//! This crate contains:
//! - `AgentService` for telemetry submission and the live agent stream
//! - `BootstrapService` for PIN exchange and key registration
//! - `WatchService` for viewer and share-token event streams

#![allow(clippy::derive_partial_eq_without_eq)]

/// NetBeacon v1 API definitions.
///
/// All generated types and services are included here.
pub mod v1 {
    tonic::include_proto!("netbeacon.v1");
}

// Re-export v1 as the default API version for convenience
pub use v1::*;

// Re-export prost_types for downstream crates that need Struct/Value conversion
pub use prost_types;
