//! Agent identity, PIN, and share-token queries.

use netbeacon_core::db::unix_timestamp;
use netbeacon_crypto::secrets::generate_pin;

use super::db::ControllerDatabase;
use super::models::{Agent, Pin, ShareToken};
use super::DatabaseError;

/// Length of server-generated provisioning PINs.
const PIN_LENGTH: usize = 6;

impl ControllerDatabase {
    // =========================================================================
    // Agent identity queries
    // =========================================================================

    /// Create an agent identity row. Called by workspace provisioning
    /// (and by tests); the controller core never invents agents.
    pub async fn create_agent(
        &self,
        agent_id: i64,
        workspace_id: i64,
    ) -> Result<Agent, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query("INSERT INTO agents (agent_id, workspace_id, created_at) VALUES (?, ?, ?)")
            .bind(agent_id)
            .bind(workspace_id)
            .bind(now)
            .execute(self.pool())
            .await?;

        self.get_agent(agent_id).await
    }

    /// Get an agent by id.
    pub async fn get_agent(&self, agent_id: i64) -> Result<Agent, DatabaseError> {
        sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Agent {agent_id}")))
    }

    /// Store a freshly minted PSK hash and mark the agent initialized.
    pub async fn set_agent_psk_hash(
        &self,
        agent_id: i64,
        psk_hash: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE agents SET psk_hash = ?, initialized = 1 WHERE agent_id = ?")
            .bind(psk_hash)
            .bind(agent_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Attach a public key to an agent after a proven key registration.
    pub async fn set_agent_public_key(
        &self,
        agent_id: i64,
        public_key: &[u8],
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE agents SET public_key = ? WHERE agent_id = ?")
            .bind(public_key)
            .bind(agent_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Stamp an agent's `last_seen_at`.
    pub async fn touch_agent(&self, agent_id: i64) -> Result<(), DatabaseError> {
        let now = unix_timestamp();

        sqlx::query("UPDATE agents SET last_seen_at = ? WHERE agent_id = ?")
            .bind(now)
            .bind(agent_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Flag an agent as deleted. Revocation flows in from workspace
    /// administration; the auth path only reads the flag.
    pub async fn mark_agent_deleted(&self, agent_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE agents SET deleted = 1 WHERE agent_id = ?")
            .bind(agent_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Provisioning PIN queries
    // =========================================================================

    /// Issue (or replace) the provisioning PIN for an agent. The PIN is
    /// generated server-side and returned to the caller exactly once.
    pub async fn issue_pin(
        &self,
        agent_id: i64,
        workspace_id: i64,
        ttl_secs: i64,
    ) -> Result<Pin, DatabaseError> {
        let pin = generate_pin(PIN_LENGTH);
        let now = unix_timestamp();

        sqlx::query(
            "INSERT OR REPLACE INTO pins (agent_id, workspace_id, pin, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(agent_id)
        .bind(workspace_id)
        .bind(pin)
        .bind(now + ttl_secs)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_valid_pin(agent_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Pin for agent {agent_id}")))
    }

    /// Get the live (unexpired) PIN for an agent, if any.
    pub async fn get_valid_pin(&self, agent_id: i64) -> Result<Option<Pin>, DatabaseError> {
        let pin = sqlx::query_as::<_, Pin>(
            "SELECT * FROM pins WHERE agent_id = ? AND expires_at > ?",
        )
        .bind(agent_id)
        .bind(unix_timestamp())
        .fetch_optional(self.pool())
        .await?;

        Ok(pin)
    }

    /// Consume an agent's PIN. PINs are one-shot; this is called exactly
    /// once, on successful bootstrap.
    pub async fn consume_pin(&self, agent_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM pins WHERE agent_id = ?")
            .bind(agent_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Share-token queries
    // =========================================================================

    /// Create a share token for an agent. `expires_at` of `None` means
    /// the token never expires.
    pub async fn create_share_token(
        &self,
        token: &str,
        agent_id: i64,
        workspace_id: i64,
        expires_at: Option<i64>,
    ) -> Result<ShareToken, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO share_tokens (token, agent_id, workspace_id, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(token)
        .bind(agent_id)
        .bind(workspace_id)
        .bind(expires_at)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_share_token(token)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Share token {token}")))
    }

    /// Look up a share token, returning `None` when unknown or expired.
    pub async fn get_share_token(&self, token: &str) -> Result<Option<ShareToken>, DatabaseError> {
        let row = sqlx::query_as::<_, ShareToken>(
            "SELECT * FROM share_tokens WHERE token = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(token)
        .bind(unix_timestamp())
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_get_agent() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();

        let agent = db.create_agent(42, 5).await.unwrap();
        assert_eq!(agent.agent_id, 42);
        assert_eq!(agent.workspace_id, 5);
        assert_eq!(agent.initialized, 0);
        assert!(!agent.is_deleted());
        assert!(agent.psk_hash.is_none());
        assert!(agent.public_key.is_none());
    }

    #[tokio::test]
    async fn psk_hash_marks_initialized() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        db.create_agent(1, 1).await.unwrap();

        db.set_agent_psk_hash(1, "deadbeef").await.unwrap();

        let agent = db.get_agent(1).await.unwrap();
        assert_eq!(agent.psk_hash.as_deref(), Some("deadbeef"));
        assert_eq!(agent.initialized, 1);
    }

    #[tokio::test]
    async fn pin_is_one_shot() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        db.create_agent(1, 1).await.unwrap();

        db.issue_pin(1, 1, 60).await.unwrap();
        assert!(db.get_valid_pin(1).await.unwrap().is_some());

        assert!(db.consume_pin(1).await.unwrap());
        assert!(db.get_valid_pin(1).await.unwrap().is_none());
        assert!(!db.consume_pin(1).await.unwrap());
    }

    #[tokio::test]
    async fn issued_pin_is_numeric_and_fresh() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        db.create_agent(1, 1).await.unwrap();

        let first = db.issue_pin(1, 1, 60).await.unwrap();
        assert_eq!(first.pin.len(), 6);
        assert!(first.pin.chars().all(|c| c.is_ascii_digit()));

        // Re-issuing replaces the stored PIN with a new secret
        let second = db.issue_pin(1, 1, 60).await.unwrap();
        assert_ne!(first.pin, second.pin);
        assert_eq!(db.get_valid_pin(1).await.unwrap().unwrap().pin, second.pin);
    }

    #[tokio::test]
    async fn expired_pin_is_not_returned() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        db.create_agent(1, 1).await.unwrap();

        // Already expired via negative TTL
        let _ = db.issue_pin(1, 1, -1).await;
        assert!(db.get_valid_pin(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn share_token_expiry() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        db.create_agent(1, 1).await.unwrap();

        db.create_share_token("tok-live", 1, 1, None).await.unwrap();
        assert!(db.get_share_token("tok-live").await.unwrap().is_some());

        let past = unix_timestamp() - 10;
        sqlx::query(
            "INSERT INTO share_tokens (token, agent_id, workspace_id, expires_at, created_at) VALUES ('tok-dead', 1, 1, ?, ?)",
        )
        .bind(past)
        .bind(past)
        .execute(db.pool())
        .await
        .unwrap();
        assert!(db.get_share_token("tok-dead").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_deleted_sets_flag() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        db.create_agent(7, 2).await.unwrap();

        assert!(db.mark_agent_deleted(7).await.unwrap());
        assert!(db.get_agent(7).await.unwrap().is_deleted());
    }
}
