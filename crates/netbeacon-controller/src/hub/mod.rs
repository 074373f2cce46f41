//! In-memory connection hubs.
//!
//! [`agent::AgentHub`] tracks the single live command stream per agent.
//! [`subscription::SubscriptionHub`] fans telemetry events out to viewer
//! and share-link subscribers.

pub mod agent;
pub mod subscription;

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique connection id.
pub fn next_conn_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}
