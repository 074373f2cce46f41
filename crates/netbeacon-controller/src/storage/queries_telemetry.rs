//! Telemetry time-series queries.
//!
//! The telemetry table is append-only. Rows are never updated; the only
//! deletion path is the retention sweep in [`super::retention`].

use netbeacon_core::db::unix_timestamp;
use sqlx::{QueryBuilder, Sqlite};

use super::db::ControllerDatabase;
use super::filter::TelemetryFilter;
use super::models::{AggregateBucket, TelemetryRecord};
use super::DatabaseError;

/// Parameters for inserting one telemetry row.
pub struct TelemetryInsert<'a> {
    pub kind: &'a str,
    pub probe_id: i64,
    pub agent_id: i64,
    pub owner_agent_id: i64,
    pub target_agent_id: Option<i64>,
    pub target: &'a str,
    pub triggered: bool,
    pub triggered_reason: &'a str,
    pub created_at: i64,
    pub received_at: i64,
    pub payload: &'a str,
}

/// JSON path of the metric averaged by [`ControllerDatabase::bucketed_mean`]
/// for a given telemetry kind.
fn metric_path(kind: &str) -> Result<&'static str, DatabaseError> {
    match kind {
        "ping" => Ok("$.avg_rtt_ms"),
        "speedtest" => Ok("$.download_mbps"),
        other => Err(DatabaseError::Unsupported(format!(
            "no aggregate metric for telemetry kind {other}"
        ))),
    }
}

impl ControllerDatabase {
    /// Append one telemetry row. Errors surface to the caller; ingestion
    /// never retries a failed insert.
    pub async fn insert_telemetry(
        &self,
        params: &TelemetryInsert<'_>,
    ) -> Result<i64, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO telemetry (kind, probe_id, agent_id, owner_agent_id, target_agent_id, target, triggered, triggered_reason, created_at, received_at, payload) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.kind)
        .bind(params.probe_id)
        .bind(params.agent_id)
        .bind(params.owner_agent_id)
        .bind(params.target_agent_id)
        .bind(params.target)
        .bind(i64::from(params.triggered))
        .bind(params.triggered_reason)
        .bind(params.created_at)
        .bind(params.received_at)
        .bind(params.payload)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Time-ordered rows for one probe.
    pub async fn probe_range(
        &self,
        probe_id: i64,
        since: Option<i64>,
        until: Option<i64>,
        ascending: bool,
        limit: i64,
    ) -> Result<Vec<TelemetryRecord>, DatabaseError> {
        let filter = TelemetryFilter {
            probe_id: Some(probe_id),
            since,
            until,
            ascending,
            limit,
            ..TelemetryFilter::new()
        };
        self.filter_telemetry(&filter).await
    }

    /// The most recent row of a kind for an agent, optionally narrowed to
    /// one probe.
    pub async fn latest_telemetry(
        &self,
        kind: &str,
        agent_id: i64,
        probe_id: Option<i64>,
    ) -> Result<Option<TelemetryRecord>, DatabaseError> {
        let filter = TelemetryFilter {
            kind: Some(kind.to_owned()),
            agent_id: Some(agent_id),
            probe_id,
            limit: 1,
            ..TelemetryFilter::new()
        };
        Ok(self.filter_telemetry(&filter).await?.into_iter().next())
    }

    /// General predicate query over the time-series.
    pub async fn filter_telemetry(
        &self,
        filter: &TelemetryFilter,
    ) -> Result<Vec<TelemetryRecord>, DatabaseError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT * FROM telemetry WHERE 1=1");
        filter.push_predicates(&mut builder);
        filter.push_tail(&mut builder);

        let rows = builder
            .build_query_as::<TelemetryRecord>()
            .fetch_all(self.pool())
            .await?;

        Ok(rows)
    }

    /// Fixed-width bucketed mean of the kind's primary metric. Buckets
    /// with no samples are absent from the result rather than zero-filled.
    pub async fn bucketed_mean(
        &self,
        kind: &str,
        probe_id: i64,
        bucket_secs: i64,
        since: i64,
        until: i64,
    ) -> Result<Vec<AggregateBucket>, DatabaseError> {
        if bucket_secs <= 0 {
            return Err(DatabaseError::Unsupported(format!(
                "bucket width must be positive, got {bucket_secs}"
            )));
        }
        let path = metric_path(kind)?;

        let buckets = sqlx::query_as::<_, AggregateBucket>(
            "SELECT (created_at / ?) * ? AS bucket_start, \
                    AVG(json_extract(payload, ?)) AS mean, \
                    COUNT(*) AS samples \
             FROM telemetry \
             WHERE kind = ? AND probe_id = ? AND created_at >= ? AND created_at <= ? \
               AND json_extract(payload, ?) IS NOT NULL \
             GROUP BY bucket_start \
             ORDER BY bucket_start ASC",
        )
        .bind(bucket_secs)
        .bind(bucket_secs)
        .bind(path)
        .bind(kind)
        .bind(probe_id)
        .bind(since)
        .bind(until)
        .bind(path)
        .fetch_all(self.pool())
        .await?;

        Ok(buckets)
    }

    /// Delete telemetry older than the horizon. Returns the row count.
    pub async fn prune_telemetry(&self, horizon_secs: i64) -> Result<u64, DatabaseError> {
        let cutoff = unix_timestamp() - horizon_secs;

        let result = sqlx::query("DELETE FROM telemetry WHERE created_at < ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }
}
