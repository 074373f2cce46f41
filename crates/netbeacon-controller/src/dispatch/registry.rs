//! Probe handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{DispatchContext, DispatchError, Envelope};
use crate::dispatch::handlers;

/// A handler for one telemetry kind.
///
/// `validate` runs before anything touches storage; an `Err` rejects the
/// envelope outright. `process` persists the row and fans the event out.
#[tonic::async_trait]
pub trait ProbeHandler: Send + Sync {
    /// The kind tag this handler owns.
    fn kind(&self) -> &'static str;

    /// Decode the payload and check value ranges. A payload that does
    /// not decode into the kind's shape is
    /// [`DispatchError::MalformedPayload`]; one that decodes but fails a
    /// semantic check is [`DispatchError::InvalidPayload`].
    fn validate(&self, payload: &Value) -> Result<(), DispatchError>;

    /// Persist and publish an already-validated envelope.
    async fn process(
        &self,
        ctx: &DispatchContext,
        envelope: &Envelope,
    ) -> Result<(), DispatchError>;
}

/// Immutable kind-to-handler map, built once at startup.
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn ProbeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every built-in probe kind.
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(handlers::ping::PingHandler));
        registry.register(Arc::new(handlers::mtr::MtrHandler));
        registry.register(Arc::new(handlers::sysinfo::SysinfoHandler));
        registry.register(Arc::new(handlers::speedtest::SpeedtestHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn ProbeHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ProbeHandler>> {
        self.handlers.get(kind)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_builtin_kinds() {
        let registry = HandlerRegistry::with_default_handlers();
        assert_eq!(registry.kinds(), vec!["mtr", "ping", "speedtest", "sysinfo"]);
        assert!(registry.get("ping").is_some());
        assert!(registry.get("dns").is_none());
    }
}
