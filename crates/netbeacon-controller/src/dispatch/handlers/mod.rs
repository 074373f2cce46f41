//! Built-in probe handlers.
//!
//! Each handler validates its kind's JSON payload shape, then persists
//! and publishes through [`store_and_publish`].

pub mod mtr;
pub mod ping;
pub mod speedtest;
pub mod sysinfo;

use tracing::debug;

use super::{DispatchContext, DispatchError, Envelope};
use crate::storage::TelemetryInsert;

/// Shared happy path for every handler: append the row, resolve the
/// reporting agent's workspace, then push the event to workspace viewers
/// and to share-link watchers of the reporting agent.
pub async fn store_and_publish(
    ctx: &DispatchContext,
    envelope: &Envelope,
) -> Result<(), DispatchError> {
    let payload = envelope.payload.to_string();
    ctx.db
        .insert_telemetry(&TelemetryInsert {
            kind: &envelope.kind,
            probe_id: envelope.probe_id,
            agent_id: envelope.agent_id,
            owner_agent_id: envelope.owner_agent_id,
            target_agent_id: envelope.target_agent_id,
            target: &envelope.target,
            triggered: envelope.triggered,
            triggered_reason: &envelope.triggered_reason,
            created_at: envelope.created_at,
            received_at: envelope.received_at,
            payload: &payload,
        })
        .await?;

    let agent = ctx.db.get_agent(envelope.agent_id).await?;
    let event = envelope.to_event(agent.workspace_id);

    let viewers = ctx
        .viewers
        .broadcast(agent.workspace_id, envelope.probe_id, &event)
        .await;
    let shares = ctx
        .shares
        .broadcast(envelope.agent_id, envelope.probe_id, &event)
        .await;

    debug!(
        kind = %envelope.kind,
        probe_id = envelope.probe_id,
        viewers,
        shares,
        "Telemetry stored and published"
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::dispatch::{Dispatcher, HandlerRegistry};
    use crate::hub::subscription::{SubscriptionHub, PROBE_WILDCARD};
    use crate::storage::ControllerDatabase;

    async fn setup() -> (Dispatcher, ControllerDatabase, Arc<SubscriptionHub>, Arc<SubscriptionHub>) {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        db.create_agent(42, 5).await.unwrap();
        let viewers = Arc::new(SubscriptionHub::new("viewer"));
        let shares = Arc::new(SubscriptionHub::new("share"));
        let dispatcher = Dispatcher::new(
            Arc::new(HandlerRegistry::with_default_handlers()),
            DispatchContext {
                db: db.clone(),
                viewers: Arc::clone(&viewers),
                shares: Arc::clone(&shares),
            },
        );
        (dispatcher, db, viewers, shares)
    }

    fn ping_envelope(payload: serde_json::Value) -> Envelope {
        Envelope {
            kind: "ping".to_owned(),
            probe_id: 3,
            agent_id: 42,
            owner_agent_id: 42,
            target_agent_id: None,
            target: "203.0.113.9".to_owned(),
            triggered: false,
            triggered_reason: String::new(),
            created_at: 100,
            received_at: 101,
            payload,
        }
    }

    #[tokio::test]
    async fn dispatch_stores_and_fans_out() {
        let (dispatcher, db, viewers, shares) = setup().await;

        let (viewer_tx, mut viewer_rx) = mpsc::channel(4);
        viewers.connect(1, viewer_tx).await;
        viewers.subscribe(1, 5, PROBE_WILDCARD).await;

        let (share_tx, mut share_rx) = mpsc::channel(4);
        shares.connect(2, share_tx).await;
        shares.subscribe(2, 42, PROBE_WILDCARD).await;

        let mut envelope = ping_envelope(serde_json::json!({
            "avg_rtt_ms": 12.5, "packets_sent": 10, "packets_recv": 9
        }));
        envelope.triggered = true;
        envelope.triggered_reason = "rtt above threshold".to_owned();
        dispatcher.dispatch(&envelope).await.unwrap();

        let row = db.latest_telemetry("ping", 42, Some(3)).await.unwrap().unwrap();
        assert_eq!(row.received_at, 101);

        let pushed = viewer_rx.try_recv().unwrap();
        assert_eq!(pushed.workspace_id, 5);
        assert_eq!(pushed.probe_id, 3);
        assert!(pushed.triggered);
        assert_eq!(pushed.triggered_reason, "rtt above threshold");
        assert!(share_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn invalid_payload_never_reaches_storage_or_watchers() {
        let (dispatcher, db, viewers, _shares) = setup().await;

        let (viewer_tx, mut viewer_rx) = mpsc::channel(4);
        viewers.connect(1, viewer_tx).await;
        viewers.subscribe(1, 5, PROBE_WILDCARD).await;

        // packets_recv > packets_sent
        let envelope = ping_envelope(serde_json::json!({
            "avg_rtt_ms": 12.5, "packets_sent": 4, "packets_recv": 9
        }));
        let err = dispatcher.dispatch(&envelope).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPayload(_)));

        assert!(db.latest_telemetry("ping", 42, None).await.unwrap().is_none());
        assert!(viewer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn undecodable_payload_is_malformed_and_not_stored() {
        let (dispatcher, db, _viewers, _shares) = setup().await;

        // Decodes as JSON but not into the ping shape
        let envelope = ping_envelope(serde_json::json!({"avg_rtt_ms": "fast"}));
        let err = dispatcher.dispatch(&envelope).await.unwrap_err();
        assert!(matches!(err, DispatchError::MalformedPayload));

        assert!(db.latest_telemetry("ping", 42, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let (dispatcher, _db, _viewers, _shares) = setup().await;

        let mut envelope = ping_envelope(serde_json::json!({}));
        envelope.kind = "dns".to_owned();
        let err = dispatcher.dispatch(&envelope).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownKind(k) if k == "dns"));
    }
}
