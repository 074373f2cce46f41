//! Agent authentication primitives for NetBeacon.
//!
//! Two schemes are supported, and they compose:
//! - shared-secret (PSK): a provisioning PIN is exchanged once for a
//!   random PSK; only the PSK hash is stored and verification is a
//!   constant-time comparison ([`secrets`]).
//! - asymmetric challenge-response: the agent proves possession of an
//!   Ed25519 key by signing a one-time nonce, then signs every request
//!   over a canonical string ([`signing`]).

pub mod error;
pub mod secrets;
pub mod signing;

pub use error::CryptoError;
