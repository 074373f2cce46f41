//! Data models for NetBeacon controller storage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agent {
    pub agent_id: i64,
    pub workspace_id: i64,
    pub psk_hash: Option<String>,
    pub public_key: Option<Vec<u8>>,
    pub initialized: i64,
    pub deleted: i64,
    pub last_seen_at: i64,
    pub created_at: i64,
}

impl Agent {
    pub const fn is_deleted(&self) -> bool {
        self.deleted != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Pin {
    pub agent_id: i64,
    pub workspace_id: i64,
    pub pin: String,
    pub expires_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TelemetryRecord {
    pub id: i64,
    pub kind: String,
    pub probe_id: i64,
    pub agent_id: i64,
    pub owner_agent_id: i64,
    pub target_agent_id: Option<i64>,
    pub target: String,
    pub triggered: i64,
    pub triggered_reason: String,
    pub created_at: i64,
    pub received_at: i64,
    pub payload: String,
}

/// Speed-test queue item states. PENDING is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueItem {
    pub id: String,
    pub workspace_id: i64,
    pub agent_id: i64,
    pub server_id: String,
    pub server_name: String,
    pub status: String,
    pub requested_by: String,
    pub requested_at: i64,
    pub completed_at: Option<i64>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShareToken {
    pub token: String,
    pub agent_id: i64,
    pub workspace_id: i64,
    pub expires_at: Option<i64>,
    pub created_at: i64,
}

/// One bucket of a fixed-width time-bucketed aggregation.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AggregateBucket {
    pub bucket_start: i64,
    pub mean: f64,
    pub samples: i64,
}
