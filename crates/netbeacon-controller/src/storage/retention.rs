//! Telemetry retention sweep.
//!
//! Deletes telemetry rows past the configured horizon on a fixed cadence.
//! This is the only deletion path for the time-series.

use std::time::Duration;

use tracing::{error, info};

use super::db::ControllerDatabase;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Run one retention pass, logging the outcome.
pub async fn sweep_once(db: &ControllerDatabase, horizon_secs: i64) {
    match db.prune_telemetry(horizon_secs).await {
        Ok(0) => {}
        Ok(deleted) => info!(deleted, "Pruned telemetry past retention horizon"),
        Err(e) => error!(error = %e, "Telemetry retention sweep failed"),
    }
}

/// Spawn the hourly retention task. The first tick fires immediately and
/// is skipped so startup does not begin with a sweep.
pub fn spawn_sweeper(db: ControllerDatabase, retention_days: i64) -> tokio::task::JoinHandle<()> {
    let horizon_secs = retention_days * 86_400;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&db, horizon_secs).await;
        }
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use netbeacon_core::db::unix_timestamp;

    use super::*;
    use crate::storage::TelemetryInsert;

    #[tokio::test]
    async fn sweep_once_deletes_old_rows() {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        let now = unix_timestamp();

        db.insert_telemetry(&TelemetryInsert {
            kind: "ping",
            probe_id: 1,
            agent_id: 42,
            owner_agent_id: 42,
            target_agent_id: None,
            target: "203.0.113.9",
            triggered: false,
            triggered_reason: "",
            created_at: now - 200_000,
            received_at: now - 200_000,
            payload: r#"{"avg_rtt_ms":1.0}"#,
        })
        .await
        .unwrap();

        sweep_once(&db, 86_400).await;

        let rows = db.probe_range(1, None, None, true, 0).await.unwrap();
        assert!(rows.is_empty());
    }
}
