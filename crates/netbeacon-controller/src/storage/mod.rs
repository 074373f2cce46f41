//! SQLite storage for the NetBeacon controller.
//!
//! Provides persistence for agent identities, provisioning PINs, the
//! append-only telemetry time-series, the speed-test queue, and share
//! tokens.

mod db;
mod filter;
mod models;
mod queries_agents;
mod queries_queue;
mod queries_telemetry;
pub mod retention;

pub use db::ControllerDatabase;
pub use filter::TelemetryFilter;
pub use models::*;
pub use netbeacon_core::db::DatabaseError;
pub use queries_telemetry::TelemetryInsert;
