//! Agent authentication.
//!
//! Two credential paths share this module: PSK bearer auth minted during
//! PIN bootstrap, and Ed25519 signed requests verified against a key
//! registered through a nonce challenge. All rejections collapse to
//! [`AuthError::Unauthorized`] except the deleted-agent case on the PSK
//! path, which callers surface distinctly so a revoked agent stops
//! retrying.

mod challenge;
mod nonce;
mod psk;
mod signed;

pub use challenge::{ChallengeStore, RegisterOutcome};
pub use nonce::NonceStore;
pub use psk::PskAuthenticator;
pub use signed::{SignedHeaders, SignedRequestVerifier};

use crate::storage::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Credential rejected. Deliberately carries no detail about which
    /// check failed.
    #[error("Unauthorized")]
    Unauthorized,

    /// The agent exists but has been revoked.
    #[error("Agent has been deleted")]
    AgentDeleted,

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}
