//! Ed25519 signed-request verification.
//!
//! Signed requests carry the agent id, a fresh nonce, a timestamp, and a
//! signature over the canonical request string. Apart from storage
//! failures every rejection is the generic [`AuthError::Unauthorized`];
//! this path never reveals whether the agent exists, is deleted, or
//! simply produced a bad signature.

use std::sync::Arc;

use netbeacon_core::db::unix_timestamp;
use netbeacon_crypto::signing::{canonical_request, verify_detached};
use tracing::warn;

use super::nonce::NonceStore;
use super::AuthError;
use crate::storage::{Agent, ControllerDatabase};

/// Credential fields extracted from a signed request's metadata.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub agent_id: i64,
    pub nonce: String,
    pub timestamp: i64,
    pub signature: Vec<u8>,
}

/// Verifies signed requests against registered agent keys.
#[derive(Clone)]
pub struct SignedRequestVerifier {
    db: ControllerDatabase,
    nonces: Arc<NonceStore>,
    skew_secs: i64,
}

impl SignedRequestVerifier {
    pub fn new(db: ControllerDatabase, skew_secs: i64) -> Self {
        Self {
            db,
            nonces: Arc::new(NonceStore::new(skew_secs)),
            skew_secs,
        }
    }

    /// Verify a signed request and return the authenticated agent.
    ///
    /// `method` and `path` name the operation being invoked and `body` is
    /// the exact request payload the client signed over.
    pub async fn verify(
        &self,
        headers: &SignedHeaders,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<Agent, AuthError> {
        let now = unix_timestamp();
        if (now - headers.timestamp).abs() > self.skew_secs {
            warn!(agent_id = headers.agent_id, "Signed request outside clock-skew window");
            return Err(AuthError::Unauthorized);
        }

        let agent = match self.db.get_agent(headers.agent_id).await {
            Ok(agent) => agent,
            Err(crate::storage::DatabaseError::NotFound(_)) => {
                warn!(agent_id = headers.agent_id, "Signed request for unknown agent");
                return Err(AuthError::Unauthorized);
            }
            Err(e) => return Err(e.into()),
        };
        if agent.is_deleted() {
            warn!(agent_id = headers.agent_id, "Signed request for deleted agent");
            return Err(AuthError::Unauthorized);
        }
        let Some(public_key) = agent.public_key.as_deref() else {
            warn!(agent_id = headers.agent_id, "Signed request for agent without a key");
            return Err(AuthError::Unauthorized);
        };

        let message = canonical_request(method, path, body, headers.timestamp, &headers.nonce);
        if verify_detached(public_key, message.as_bytes(), &headers.signature).is_err() {
            warn!(agent_id = headers.agent_id, "Signed request with bad signature");
            return Err(AuthError::Unauthorized);
        }

        // Replay check comes after signature verification so attackers
        // cannot burn nonces with forged requests.
        if !self.nonces.insert_once(&headers.nonce) {
            warn!(agent_id = headers.agent_id, "Signed request replayed a nonce");
            return Err(AuthError::Unauthorized);
        }

        self.db.touch_agent(agent.agent_id).await?;
        Ok(agent)
    }
}
