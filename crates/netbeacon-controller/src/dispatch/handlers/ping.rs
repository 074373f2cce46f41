//! ICMP ping probe results.

use serde::Deserialize;
use serde_json::Value;

use super::{store_and_publish, DispatchContext, DispatchError, Envelope};
use crate::dispatch::ProbeHandler;

#[derive(Debug, Deserialize)]
struct PingPayload {
    avg_rtt_ms: f64,
    packets_sent: u64,
    packets_recv: u64,
}

pub struct PingHandler;

#[tonic::async_trait]
impl ProbeHandler for PingHandler {
    fn kind(&self) -> &'static str {
        "ping"
    }

    fn validate(&self, payload: &Value) -> Result<(), DispatchError> {
        let ping: PingPayload = serde_json::from_value(payload.clone())
            .map_err(|_| DispatchError::MalformedPayload)?;
        if ping.packets_sent == 0 {
            return Err(DispatchError::InvalidPayload(
                "packets_sent must be positive".to_owned(),
            ));
        }
        if ping.packets_recv > ping.packets_sent {
            return Err(DispatchError::InvalidPayload(
                "packets_recv exceeds packets_sent".to_owned(),
            ));
        }
        if !ping.avg_rtt_ms.is_finite() || ping.avg_rtt_ms < 0.0 {
            return Err(DispatchError::InvalidPayload(
                "avg_rtt_ms must be non-negative".to_owned(),
            ));
        }
        Ok(())
    }

    async fn process(
        &self,
        ctx: &DispatchContext,
        envelope: &Envelope,
    ) -> Result<(), DispatchError> {
        store_and_publish(ctx, envelope).await
    }
}
