//! Challenge-response Ed25519 key registration.
//!
//! An agent holding a live PIN asks for a nonce challenge, signs the
//! nonce with its new keypair, and submits the signature together with
//! the public key. On success the key is stored and the PIN is consumed.

use std::collections::HashMap;
use std::sync::Mutex;

use netbeacon_core::db::unix_timestamp;
use netbeacon_crypto::secrets::generate_nonce;
use netbeacon_crypto::signing::verify_detached;
use tracing::{info, warn};

use super::AuthError;
use crate::storage::ControllerDatabase;

struct Challenge {
    nonce: String,
    expires_at: i64,
}

/// Result of a successful key registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub agent_id: i64,
    pub workspace_id: i64,
}

/// Issues and verifies bootstrap challenges. One pending challenge per
/// agent; a new request replaces the old one.
pub struct ChallengeStore {
    db: ControllerDatabase,
    pending: Mutex<HashMap<i64, Challenge>>,
    ttl_secs: i64,
}

impl ChallengeStore {
    pub fn new(db: ControllerDatabase, ttl_secs: i64) -> Self {
        Self {
            db,
            pending: Mutex::new(HashMap::new()),
            ttl_secs,
        }
    }

    /// Issue a nonce challenge to an agent that proves PIN possession.
    pub async fn create_challenge(
        &self,
        workspace_id: i64,
        agent_id: i64,
        pin: &str,
    ) -> Result<String, AuthError> {
        self.check_pin(workspace_id, agent_id, pin).await?;

        let nonce = generate_nonce();
        let expires_at = unix_timestamp() + self.ttl_secs;
        self.lock_pending().insert(
            agent_id,
            Challenge {
                nonce: nonce.clone(),
                expires_at,
            },
        );

        info!(agent_id, "Issued key-registration challenge");
        Ok(nonce)
    }

    /// Verify a signed challenge and register the public key.
    ///
    /// The pending challenge is consumed whenever the presented nonce
    /// matches, even if the signature then fails, so a bad signature
    /// cannot be retried against the same nonce. A mismatched nonce
    /// leaves the pending challenge intact.
    pub async fn register_key(
        &self,
        workspace_id: i64,
        agent_id: i64,
        pin: &str,
        nonce: &str,
        public_key: &[u8],
        signature: &[u8],
    ) -> Result<RegisterOutcome, AuthError> {
        self.check_pin(workspace_id, agent_id, pin).await?;

        {
            let mut pending = self.lock_pending();
            let Some(challenge) = pending.get(&agent_id) else {
                warn!(agent_id, "Key registration with no pending challenge");
                return Err(AuthError::Unauthorized);
            };
            if challenge.nonce != nonce {
                warn!(agent_id, "Key registration with mismatched nonce");
                return Err(AuthError::Unauthorized);
            }
            let expired = challenge.expires_at <= unix_timestamp();
            pending.remove(&agent_id);
            if expired {
                warn!(agent_id, "Key registration with expired challenge");
                return Err(AuthError::Unauthorized);
            }
        }

        if verify_detached(public_key, nonce.as_bytes(), signature).is_err() {
            warn!(agent_id, "Key registration with bad signature");
            return Err(AuthError::Unauthorized);
        }

        self.db.set_agent_public_key(agent_id, public_key).await?;
        self.db.consume_pin(agent_id).await?;

        info!(agent_id, workspace_id, "Agent public key registered");
        Ok(RegisterOutcome {
            agent_id,
            workspace_id,
        })
    }

    /// Validate the PIN against the workspace it was issued for.
    async fn check_pin(&self, workspace_id: i64, agent_id: i64, pin: &str) -> Result<(), AuthError> {
        let Some(stored) = self.db.get_valid_pin(agent_id).await? else {
            warn!(agent_id, "Challenge request with no live PIN");
            return Err(AuthError::Unauthorized);
        };
        if stored.pin != pin || stored.workspace_id != workspace_id {
            warn!(agent_id, workspace_id, "Challenge request with wrong credentials");
            return Err(AuthError::Unauthorized);
        }
        Ok(())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Challenge>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
