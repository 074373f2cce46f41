//! MTR (traceroute) probe results.

use serde::Deserialize;
use serde_json::Value;

use super::{store_and_publish, DispatchContext, DispatchError, Envelope};
use crate::dispatch::ProbeHandler;

#[derive(Debug, Deserialize)]
struct MtrPayload {
    hops: Vec<MtrHop>,
}

#[derive(Debug, Deserialize)]
struct MtrHop {
    #[serde(rename = "hop")]
    number: u32,
    #[allow(dead_code)]
    host: String,
    loss_pct: f64,
}

pub struct MtrHandler;

#[tonic::async_trait]
impl ProbeHandler for MtrHandler {
    fn kind(&self) -> &'static str {
        "mtr"
    }

    fn validate(&self, payload: &Value) -> Result<(), DispatchError> {
        let mtr: MtrPayload = serde_json::from_value(payload.clone())
            .map_err(|_| DispatchError::MalformedPayload)?;
        if mtr.hops.is_empty() {
            return Err(DispatchError::InvalidPayload(
                "hops must not be empty".to_owned(),
            ));
        }
        for hop in &mtr.hops {
            if hop.number == 0 {
                return Err(DispatchError::InvalidPayload(
                    "hop numbers start at 1".to_owned(),
                ));
            }
            if !(0.0..=100.0).contains(&hop.loss_pct) {
                return Err(DispatchError::InvalidPayload(format!(
                    "hop {} loss_pct out of range",
                    hop.number
                )));
            }
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
