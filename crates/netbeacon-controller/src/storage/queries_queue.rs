//! Speed-test queue queries.
//!
//! Items start PENDING and move exactly once to COMPLETED, FAILED, or
//! EXPIRED. Every transition guards on `status = 'PENDING'` so a stale
//! completion racing the expiry sweep cannot overwrite a terminal state.

use netbeacon_core::db::unix_timestamp;

use super::db::ControllerDatabase;
use super::models::{QueueItem, QueueStatus};
use super::DatabaseError;

impl ControllerDatabase {
    /// Insert a new PENDING queue item.
    pub async fn enqueue_speedtest(
        &self,
        id: &str,
        workspace_id: i64,
        agent_id: i64,
        server_id: &str,
        server_name: &str,
        requested_by: &str,
    ) -> Result<QueueItem, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO speedtest_queue (id, workspace_id, agent_id, server_id, server_name, status, requested_by, requested_at) \
             VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?)",
        )
        .bind(id)
        .bind(workspace_id)
        .bind(agent_id)
        .bind(server_id)
        .bind(server_name)
        .bind(requested_by)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_queue_item(id).await
    }

    /// Get a queue item by id.
    pub async fn get_queue_item(&self, id: &str) -> Result<QueueItem, DatabaseError> {
        sqlx::query_as::<_, QueueItem>("SELECT * FROM speedtest_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Queue item {id}")))
    }

    /// All PENDING items for an agent, oldest first.
    pub async fn pending_for_agent(&self, agent_id: i64) -> Result<Vec<QueueItem>, DatabaseError> {
        let items = sqlx::query_as::<_, QueueItem>(
            "SELECT * FROM speedtest_queue WHERE agent_id = ? AND status = 'PENDING' ORDER BY requested_at ASC",
        )
        .bind(agent_id)
        .fetch_all(self.pool())
        .await?;

        Ok(items)
    }

    /// Transition a PENDING item to COMPLETED. Returns `false` when the
    /// item is missing or already terminal.
    pub async fn mark_queue_completed(&self, id: &str) -> Result<bool, DatabaseError> {
        self.finish_queue_item(id, QueueStatus::Completed, "").await
    }

    /// Transition a PENDING item to FAILED with an error message.
    pub async fn mark_queue_failed(&self, id: &str, error: &str) -> Result<bool, DatabaseError> {
        self.finish_queue_item(id, QueueStatus::Failed, error).await
    }

    async fn finish_queue_item(
        &self,
        id: &str,
        status: QueueStatus,
        error: &str,
    ) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE speedtest_queue SET status = ?, completed_at = ?, error = ? \
             WHERE id = ? AND status = 'PENDING'",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(error)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove a PENDING item. Terminal items are kept as history, so
    /// cancelling them is a no-op returning `false`.
    pub async fn cancel_queue_item(&self, id: &str) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("DELETE FROM speedtest_queue WHERE id = ? AND status = 'PENDING'")
                .bind(id)
                .execute(self.pool())
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move PENDING items older than the deadline to EXPIRED. Returns the
    /// number of items expired.
    pub async fn expire_stale_queue_items(&self, max_age_secs: i64) -> Result<u64, DatabaseError> {
        let now = unix_timestamp();
        let deadline = now - max_age_secs;

        let result = sqlx::query(
            "UPDATE speedtest_queue SET status = 'EXPIRED', completed_at = ? \
             WHERE status = 'PENDING' AND requested_at < ?",
        )
        .bind(now)
        .bind(deadline)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn enqueue(db: &ControllerDatabase, id: &str, agent_id: i64) -> QueueItem {
        db.enqueue_speedtest(id, 5, agent_id, "srv-1", "Test Server", "operator")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_starts_pending() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        let item = enqueue(&db, "q1", 42).await;
        assert_eq!(item.status, "PENDING");
        assert!(item.completed_at.is_none());
        assert_eq!(item.server_name, "Test Server");
    }

    #[tokio::test]
    async fn pending_for_agent_is_oldest_first() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        enqueue(&db, "q1", 42).await;
        enqueue(&db, "q2", 42).await;
        enqueue(&db, "other", 7).await;

        sqlx::query("UPDATE speedtest_queue SET requested_at = 1 WHERE id = 'q2'")
            .execute(db.pool())
            .await
            .unwrap();

        let pending = db.pending_for_agent(42).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["q2", "q1"]);
    }

    #[tokio::test]
    async fn completion_is_single_shot() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        enqueue(&db, "q1", 42).await;

        assert!(db.mark_queue_completed("q1").await.unwrap());
        // Second transition attempt loses
        assert!(!db.mark_queue_completed("q1").await.unwrap());
        assert!(!db.mark_queue_failed("q1", "late failure").await.unwrap());

        let item = db.get_queue_item("q1").await.unwrap();
        assert_eq!(item.status, "COMPLETED");
        assert!(item.completed_at.is_some());
        assert_eq!(item.error, "");
    }

    #[tokio::test]
    async fn failure_records_error() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        enqueue(&db, "q1", 42).await;

        assert!(db.mark_queue_failed("q1", "server unreachable").await.unwrap());
        let item = db.get_queue_item("q1").await.unwrap();
        assert_eq!(item.status, "FAILED");
        assert_eq!(item.error, "server unreachable");
    }

    #[tokio::test]
    async fn cancel_only_removes_pending() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        enqueue(&db, "q1", 42).await;
        enqueue(&db, "q2", 42).await;
        db.mark_queue_completed("q2").await.unwrap();

        assert!(db.cancel_queue_item("q1").await.unwrap());
        assert!(db.get_queue_item("q1").await.is_err());

        assert!(!db.cancel_queue_item("q2").await.unwrap());
        assert_eq!(db.get_queue_item("q2").await.unwrap().status, "COMPLETED");
    }

    #[tokio::test]
    async fn expiry_sweep_skips_fresh_and_terminal() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        enqueue(&db, "stale", 42).await;
        enqueue(&db, "fresh", 42).await;
        enqueue(&db, "done", 42).await;
        db.mark_queue_completed("done").await.unwrap();

        sqlx::query("UPDATE speedtest_queue SET requested_at = requested_at - 10000 WHERE id IN ('stale', 'done')")
            .execute(db.pool())
            .await
            .unwrap();

        let expired = db.expire_stale_queue_items(3600).await.unwrap();
        assert_eq!(expired, 1);
        assert_eq!(db.get_queue_item("stale").await.unwrap().status, "EXPIRED");
        assert_eq!(db.get_queue_item("fresh").await.unwrap().status, "PENDING");
        assert_eq!(db.get_queue_item("done").await.unwrap().status, "COMPLETED");
    }
}
