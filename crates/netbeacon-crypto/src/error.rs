//! Error types for netbeacon-crypto.

use thiserror::Error;

/// Errors from key handling and signature verification.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A key or signature had the wrong byte length.
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// The public key bytes do not decode to a valid Ed25519 point.
    #[error("Malformed public key")]
    MalformedKey,

    /// The signature bytes are not a structurally valid signature.
    #[error("Malformed signature")]
    MalformedSignature,

    /// The signature does not verify against the key and message.
    #[error("Signature verification failed")]
    BadSignature,
}
