//! Speed-test results, both scheduled and queued.

use serde::Deserialize;
use serde_json::Value;

use super::{store_and_publish, DispatchContext, DispatchError, Envelope};
use crate::dispatch::ProbeHandler;

#[derive(Debug, Deserialize)]
struct SpeedtestPayload {
    download_mbps: f64,
    upload_mbps: f64,
    #[serde(default)]
    latency_ms: Option<f64>,
}

pub struct SpeedtestHandler;

#[tonic::async_trait]
impl ProbeHandler for SpeedtestHandler {
    fn kind(&self) -> &'static str {
        "speedtest"
    }

    fn validate(&self, payload: &Value) -> Result<(), DispatchError> {
        let result: SpeedtestPayload = serde_json::from_value(payload.clone())
            .map_err(|_| DispatchError::MalformedPayload)?;
        for (name, rate) in [
            ("download_mbps", result.download_mbps),
            ("upload_mbps", result.upload_mbps),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(DispatchError::InvalidPayload(format!(
                    "{name} must be non-negative"
                )));
            }
        }
        if let Some(latency) = result.latency_ms {
            if !latency.is_finite() || latency < 0.0 {
                return Err(DispatchError::InvalidPayload(
                    "latency_ms must be non-negative".to_owned(),
                ));
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
