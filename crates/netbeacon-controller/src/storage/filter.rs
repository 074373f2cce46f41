//! Composable predicate filter for telemetry queries.

use sqlx::{QueryBuilder, Sqlite};

/// Filter over the telemetry time-series. Every field is optional; unset
/// fields do not constrain the result. Time bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct TelemetryFilter {
    pub kind: Option<String>,
    pub probe_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub owner_agent_id: Option<i64>,
    pub target_agent_id: Option<i64>,
    pub target_prefix: Option<String>,
    pub triggered: Option<bool>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    /// Maximum rows to return; zero or negative means unbounded.
    pub limit: i64,
    /// Sort by `created_at` ascending when set, descending otherwise.
    pub ascending: bool,
}

impl TelemetryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append this filter's predicates to a query that already ends in a
    /// position where `AND ...` clauses are valid (i.e. after `WHERE 1=1`).
    pub fn push_predicates(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(kind) = &self.kind {
            builder.push(" AND kind = ").push_bind(kind.clone());
        }
        if let Some(probe_id) = self.probe_id {
            builder.push(" AND probe_id = ").push_bind(probe_id);
        }
        if let Some(agent_id) = self.agent_id {
            builder.push(" AND agent_id = ").push_bind(agent_id);
        }
        if let Some(owner) = self.owner_agent_id {
            builder.push(" AND owner_agent_id = ").push_bind(owner);
        }
        if let Some(target) = self.target_agent_id {
            builder.push(" AND target_agent_id = ").push_bind(target);
        }
        if let Some(prefix) = &self.target_prefix {
            builder
                .push(" AND target LIKE ")
                .push_bind(format!("{prefix}%"));
        }
        if let Some(triggered) = self.triggered {
            builder
                .push(" AND triggered = ")
                .push_bind(i64::from(triggered));
        }
        if let Some(since) = self.since {
            builder.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = self.until {
            builder.push(" AND created_at <= ").push_bind(until);
        }
    }

    /// Append `ORDER BY` and `LIMIT` clauses.
    pub fn push_tail(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        builder.push(if self.ascending {
            " ORDER BY created_at ASC"
        } else {
            " ORDER BY created_at DESC"
        });
        if self.limit > 0 {
            builder.push(" LIMIT ").push_bind(self.limit);
        }
    }
}
