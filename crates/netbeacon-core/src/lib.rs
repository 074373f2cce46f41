//! Core library for NetBeacon.
//!
//! Shared plumbing used by the controller and by tooling: SQLite pool
//! helpers and the `define_database!` macro, plus tracing initialization.

pub mod db;
pub mod tracing_init;
