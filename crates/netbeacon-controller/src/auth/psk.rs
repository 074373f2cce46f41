//! PIN bootstrap and PSK verification.

use netbeacon_crypto::secrets::{generate_psk, hash_psk, verify_psk};
use tracing::{info, warn};

use super::AuthError;
use crate::storage::{Agent, ControllerDatabase};

/// Verifies PSK bearer credentials and runs the PIN-to-PSK exchange.
#[derive(Clone)]
pub struct PskAuthenticator {
    db: ControllerDatabase,
}

impl PskAuthenticator {
    pub const fn new(db: ControllerDatabase) -> Self {
        Self { db }
    }

    /// Exchange a provisioning PIN for a freshly minted PSK.
    ///
    /// The PIN stays live afterwards so the agent can complete key
    /// registration with it; only the challenge flow consumes it. A
    /// repeated exchange before registration replaces the stored hash.
    pub async fn exchange_pin(
        &self,
        workspace_id: i64,
        agent_id: i64,
        pin: &str,
    ) -> Result<String, AuthError> {
        let Some(stored) = self.db.get_valid_pin(agent_id).await? else {
            warn!(agent_id, "PIN exchange with no live PIN");
            return Err(AuthError::Unauthorized);
        };
        if stored.pin != pin || stored.workspace_id != workspace_id {
            warn!(agent_id, workspace_id, "PIN exchange with wrong credentials");
            return Err(AuthError::Unauthorized);
        }

        let psk = generate_psk();
        self.db.set_agent_psk_hash(agent_id, &hash_psk(&psk)).await?;

        info!(agent_id, "PSK minted for agent");
        Ok(psk)
    }

    /// Verify a PSK credential pair and return the agent on success.
    ///
    /// Stamps `last_seen_at`. This is the one path that distinguishes a
    /// revoked agent from a bad credential.
    pub async fn verify_login(
        &self,
        workspace_id: i64,
        agent_id: i64,
        psk: &str,
    ) -> Result<Agent, AuthError> {
        let agent = match self.db.get_agent(agent_id).await {
            Ok(agent) => agent,
            Err(crate::storage::DatabaseError::NotFound(_)) => {
                warn!(agent_id, "PSK login for unknown agent");
                return Err(AuthError::Unauthorized);
            }
            Err(e) => return Err(e.into()),
        };

        if agent.is_deleted() {
            warn!(agent_id, "PSK login for deleted agent");
            return Err(AuthError::AgentDeleted);
        }
        if agent.workspace_id != workspace_id {
            warn!(agent_id, workspace_id, "PSK login with mismatched workspace");
            return Err(AuthError::Unauthorized);
        }
        let Some(hash) = agent.psk_hash.as_deref() else {
            warn!(agent_id, "PSK login for agent without a PSK");
            return Err(AuthError::Unauthorized);
        };
        if !verify_psk(psk, hash) {
            warn!(agent_id, "PSK login with bad secret");
            return Err(AuthError::Unauthorized);
        }

        self.db.touch_agent(agent_id).await?;
        Ok(agent)
    }
}
