//! Host system-information reports.

use serde::Deserialize;
use serde_json::Value;

use super::{store_and_publish, DispatchContext, DispatchError, Envelope};
use crate::dispatch::ProbeHandler;

#[derive(Debug, Deserialize)]
struct SysinfoPayload {
    hostname: String,
    #[serde(default)]
    cpu_pct: Option<f64>,
    #[serde(default)]
    mem_pct: Option<f64>,
}

pub struct SysinfoHandler;

#[tonic::async_trait]
impl ProbeHandler for SysinfoHandler {
    fn kind(&self) -> &'static str {
        "sysinfo"
    }

    fn validate(&self, payload: &Value) -> Result<(), DispatchError> {
        let info: SysinfoPayload = serde_json::from_value(payload.clone())
            .map_err(|_| DispatchError::MalformedPayload)?;
        if info.hostname.trim().is_empty() {
            return Err(DispatchError::InvalidPayload(
                "hostname must not be empty".to_owned(),
            ));
        }
        for (name, pct) in [("cpu_pct", info.cpu_pct), ("mem_pct", info.mem_pct)] {
            if let Some(v) = pct {
                if !(0.0..=100.0).contains(&v) {
                    return Err(DispatchError::InvalidPayload(format!("{name} out of range")));
                }
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
