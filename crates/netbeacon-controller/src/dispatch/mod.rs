//! Telemetry dispatch.
//!
//! Every telemetry submission flows through one pipeline regardless of
//! origin (direct submit or speed-test completion): decode the envelope,
//! look up the handler registered for its kind, validate the payload,
//! then let the handler persist and fan out. Validation failure stops
//! the pipeline before anything is stored or published.

pub mod handlers;
mod registry;

use std::sync::Arc;

use netbeacon_core::db::unix_timestamp;
use netbeacon_proto::v1::{EventPush, TelemetryEnvelope};
use serde_json::Value;
use tracing::{debug, warn};

pub use registry::{HandlerRegistry, ProbeHandler};

use crate::hub::subscription::SubscriptionHub;
use crate::storage::{ControllerDatabase, DatabaseError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No handler registered for kind: {0}")]
    UnknownKind(String),

    #[error("Malformed payload")]
    MalformedPayload,

    #[error("Payload rejected: {0}")]
    InvalidPayload(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// A decoded telemetry submission.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: String,
    pub probe_id: i64,
    pub agent_id: i64,
    pub owner_agent_id: i64,
    pub target_agent_id: Option<i64>,
    pub target: String,
    pub triggered: bool,
    pub triggered_reason: String,
    pub created_at: i64,
    /// Server-side receipt time; never taken from the wire.
    pub received_at: i64,
    pub payload: Value,
}

impl Envelope {
    /// Decode a wire envelope, stamping `received_at` with the current
    /// server time.
    pub fn from_proto(proto: &TelemetryEnvelope) -> Result<Self, DispatchError> {
        let payload: Value =
            serde_json::from_slice(&proto.payload).map_err(|_| DispatchError::MalformedPayload)?;

        Ok(Self {
            kind: proto.kind.clone(),
            probe_id: proto.probe_id,
            agent_id: proto.agent_id,
            owner_agent_id: proto.owner_agent_id,
            target_agent_id: (proto.target_agent_id != 0).then_some(proto.target_agent_id),
            target: proto.target.clone(),
            triggered: proto.triggered,
            triggered_reason: proto.triggered_reason.clone(),
            created_at: proto.created_at,
            received_at: unix_timestamp(),
            payload,
        })
    }

    /// Build the event pushed to watch streams.
    pub fn to_event(&self, workspace_id: i64) -> EventPush {
        EventPush {
            workspace_id,
            kind: self.kind.clone(),
            probe_id: self.probe_id,
            agent_id: self.agent_id,
            owner_agent_id: self.owner_agent_id,
            target_agent_id: self.target_agent_id.unwrap_or(0),
            target: self.target.clone(),
            triggered: self.triggered,
            triggered_reason: self.triggered_reason.clone(),
            created_at: self.created_at,
            received_at: self.received_at,
            payload: self.payload.to_string().into_bytes(),
        }
    }
}

/// Shared state handlers act on.
pub struct DispatchContext {
    pub db: ControllerDatabase,
    pub viewers: Arc<SubscriptionHub>,
    pub shares: Arc<SubscriptionHub>,
}

/// Routes envelopes to their registered handler.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    ctx: DispatchContext,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, ctx: DispatchContext) -> Self {
        Self { registry, ctx }
    }

    /// Run one envelope through validate-then-process.
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<(), DispatchError> {
        let Some(handler) = self.registry.get(&envelope.kind) else {
            warn!(kind = %envelope.kind, agent_id = envelope.agent_id, "Telemetry with unknown kind");
            return Err(DispatchError::UnknownKind(envelope.kind.clone()));
        };

        handler.validate(&envelope.payload)?;

        handler.process(&self.ctx, envelope).await?;

        debug!(
            kind = %envelope.kind,
            probe_id = envelope.probe_id,
            agent_id = envelope.agent_id,
            "Telemetry dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn proto_envelope(payload: &[u8]) -> TelemetryEnvelope {
        TelemetryEnvelope {
            kind: "ping".to_owned(),
            probe_id: 3,
            agent_id: 42,
            owner_agent_id: 42,
            target_agent_id: 0,
            target: "203.0.113.9".to_owned(),
            triggered: false,
            triggered_reason: String::new(),
            created_at: 1_700_000_000,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn from_proto_stamps_received_at() {
        let before = unix_timestamp();
        let envelope = Envelope::from_proto(&proto_envelope(br#"{"avg_rtt_ms":1.0}"#)).unwrap();
        assert!(envelope.received_at >= before);
        assert!(envelope.target_agent_id.is_none());
    }

    #[test]
    fn from_proto_rejects_non_json_payload() {
        let err = Envelope::from_proto(&proto_envelope(b"not json")).unwrap_err();
        assert!(matches!(err, DispatchError::MalformedPayload));
    }

    #[test]
    fn nonzero_target_agent_is_some() {
        let mut proto = proto_envelope(b"{}");
        proto.target_agent_id = 7;
        let envelope = Envelope::from_proto(&proto).unwrap();
        assert_eq!(envelope.target_agent_id, Some(7));
    }

    #[test]
    fn to_event_carries_the_full_envelope() {
        let mut proto = proto_envelope(br#"{"avg_rtt_ms":1.5}"#);
        proto.target_agent_id = 7;
        proto.triggered = true;
        proto.triggered_reason = "rtt above threshold".to_owned();
        let envelope = Envelope::from_proto(&proto).unwrap();

        let event = envelope.to_event(5);
        assert_eq!(event.workspace_id, 5);
        assert_eq!(event.probe_id, 3);
        assert_eq!(event.target_agent_id, 7);
        assert!(event.triggered);
        assert_eq!(event.triggered_reason, "rtt above threshold");
        let parsed: Value = serde_json::from_slice(&event.payload).unwrap();
        assert_eq!(parsed["avg_rtt_ms"], 1.5);
    }

    #[test]
    fn to_event_maps_absent_target_agent_to_zero() {
        let envelope = Envelope::from_proto(&proto_envelope(b"{}")).unwrap();
        assert_eq!(envelope.to_event(5).target_agent_id, 0);
    }
}
