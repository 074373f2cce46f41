//! Subscription hub for telemetry fan-out.
//!
//! Subscribers register against `(scope_id, probe_id)` keys where
//! `probe_id` 0 subscribes to every probe in the scope. A broadcast for
//! `(scope_id, probe_id)` reaches the union of the exact-key and the
//! wildcard-key subscriber sets, each connection at most once. Delivery
//! is best-effort: a full channel drops the event for that connection
//! only.
//!
//! Two instances exist in the controller: one keyed by workspace id for
//! authenticated viewers, one keyed by agent id for share links.

use std::collections::{HashMap, HashSet};

use netbeacon_proto::v1::EventPush;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Wildcard probe id matching every probe in a scope.
pub const PROBE_WILDCARD: i64 = 0;

struct Subscriber {
    tx: mpsc::Sender<EventPush>,
    /// Reverse index of this connection's keys, for O(keys) teardown.
    keys: HashSet<(i64, i64)>,
}

#[derive(Default)]
struct SubscriptionMap {
    subs: HashMap<(i64, i64), HashSet<u64>>,
    conns: HashMap<u64, Subscriber>,
}

pub struct SubscriptionHub {
    /// Hub name for log lines ("viewer" or "share").
    name: &'static str,
    inner: RwLock<SubscriptionMap>,
}

impl SubscriptionHub {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: RwLock::new(SubscriptionMap::default()),
        }
    }

    /// Attach a connection's event channel. Must precede any subscribe
    /// call for that connection.
    pub async fn connect(&self, conn_id: u64, tx: mpsc::Sender<EventPush>) {
        let mut inner = self.inner.write().await;
        inner.conns.insert(
            conn_id,
            Subscriber {
                tx,
                keys: HashSet::new(),
            },
        );
        debug!(hub = self.name, conn_id, "Subscriber connected");
    }

    /// Subscribe a connection to `(scope_id, probe_id)`. Unknown
    /// connections are ignored.
    pub async fn subscribe(&self, conn_id: u64, scope_id: i64, probe_id: i64) {
        let mut inner = self.inner.write().await;
        let Some(sub) = inner.conns.get_mut(&conn_id) else {
            return;
        };
        let key = (scope_id, probe_id);
        sub.keys.insert(key);
        inner.subs.entry(key).or_default().insert(conn_id);
        debug!(hub = self.name, conn_id, scope_id, probe_id, "Subscribed");
    }

    /// Drop one subscription. The empty key set is removed so broadcast
    /// never walks dead keys.
    pub async fn unsubscribe(&self, conn_id: u64, scope_id: i64, probe_id: i64) {
        let mut inner = self.inner.write().await;
        let key = (scope_id, probe_id);
        if let Some(sub) = inner.conns.get_mut(&conn_id) {
            sub.keys.remove(&key);
        }
        if let Some(set) = inner.subs.get_mut(&key) {
            set.remove(&conn_id);
            if set.is_empty() {
                inner.subs.remove(&key);
            }
        }
    }

    /// Remove a connection and every subscription it holds.
    pub async fn disconnect(&self, conn_id: u64) {
        let mut inner = self.inner.write().await;
        let Some(sub) = inner.conns.remove(&conn_id) else {
            return;
        };
        for key in sub.keys {
            if let Some(set) = inner.subs.get_mut(&key) {
                set.remove(&conn_id);
                if set.is_empty() {
                    inner.subs.remove(&key);
                }
            }
        }
        debug!(hub = self.name, conn_id, "Subscriber disconnected");
    }

    /// Deliver an event to every subscriber of `(scope_id, probe_id)`,
    /// including wildcard subscribers of the scope. Returns the number of
    /// connections reached.
    pub async fn broadcast(&self, scope_id: i64, probe_id: i64, event: &EventPush) -> usize {
        let inner = self.inner.read().await;

        let mut targets: HashSet<u64> = HashSet::new();
        if let Some(set) = inner.subs.get(&(scope_id, probe_id)) {
            targets.extend(set);
        }
        if probe_id != PROBE_WILDCARD {
            if let Some(set) = inner.subs.get(&(scope_id, PROBE_WILDCARD)) {
                targets.extend(set);
            }
        }

        let mut delivered = 0;
        for conn_id in targets {
            let Some(sub) = inner.conns.get(&conn_id) else {
                continue;
            };
            if sub.tx.try_send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!(hub = self.name, conn_id, "Dropped event for slow subscriber");
            }
        }
        delivered
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn event(probe_id: i64) -> EventPush {
        EventPush {
            workspace_id: 5,
            kind: "ping".to_owned(),
            probe_id,
            agent_id: 42,
            owner_agent_id: 42,
            target_agent_id: 0,
            target: "203.0.113.9".to_owned(),
            triggered: false,
            triggered_reason: String::new(),
            created_at: 100,
            received_at: 101,
            payload: br#"{"avg_rtt_ms":12.5}"#.to_vec(),
        }
    }

    #[tokio::test]
    async fn exact_and_wildcard_subscribers_both_receive() {
        let hub = SubscriptionHub::new("viewer");
        let (tx_exact, mut rx_exact) = mpsc::channel(4);
        let (tx_wild, mut rx_wild) = mpsc::channel(4);
        let (tx_other, mut rx_other) = mpsc::channel(4);

        hub.connect(1, tx_exact).await;
        hub.subscribe(1, 5, 3).await;
        hub.connect(2, tx_wild).await;
        hub.subscribe(2, 5, PROBE_WILDCARD).await;
        hub.connect(3, tx_other).await;
        hub.subscribe(3, 5, 9).await;

        let delivered = hub.broadcast(5, 3, &event(3)).await;
        assert_eq!(delivered, 2);
        assert!(rx_exact.try_recv().is_ok());
        assert!(rx_wild.try_recv().is_ok());
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn overlapping_subscriptions_deliver_once() {
        let hub = SubscriptionHub::new("viewer");
        let (tx, mut rx) = mpsc::channel(4);

        hub.connect(1, tx).await;
        hub.subscribe(1, 5, 3).await;
        hub.subscribe(1, 5, PROBE_WILDCARD).await;

        let delivered = hub.broadcast(5, 3, &event(3)).await;
        assert_eq!(delivered, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn scope_isolation() {
        let hub = SubscriptionHub::new("viewer");
        let (tx, mut rx) = mpsc::channel(4);

        hub.connect(1, tx).await;
        hub.subscribe(1, 5, PROBE_WILDCARD).await;

        assert_eq!(hub.broadcast(9, 3, &event(3)).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = SubscriptionHub::new("viewer");
        let (tx, mut rx) = mpsc::channel(4);

        hub.connect(1, tx).await;
        hub.subscribe(1, 5, 3).await;
        hub.unsubscribe(1, 5, 3).await;

        assert_eq!(hub.broadcast(5, 3, &event(3)).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_purges_all_keys() {
        let hub = SubscriptionHub::new("share");
        let (tx, _rx) = mpsc::channel(4);

        hub.connect(1, tx).await;
        hub.subscribe(1, 5, 3).await;
        hub.subscribe(1, 5, PROBE_WILDCARD).await;
        hub.subscribe(1, 7, 1).await;
        hub.disconnect(1).await;

        assert_eq!(hub.broadcast(5, 3, &event(3)).await, 0);
        assert_eq!(hub.broadcast(7, 1, &event(1)).await, 0);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_without_blocking_others() {
        let hub = SubscriptionHub::new("viewer");
        let (tx_slow, _rx_slow) = mpsc::channel(1);
        let (tx_ok, mut rx_ok) = mpsc::channel(4);

        hub.connect(1, tx_slow).await;
        hub.subscribe(1, 5, 3).await;
        hub.connect(2, tx_ok).await;
        hub.subscribe(2, 5, 3).await;

        // Fill the slow channel
        assert_eq!(hub.broadcast(5, 3, &event(3)).await, 2);
        // Slow channel is now full; healthy one still gets the event
        assert_eq!(hub.broadcast(5, 3, &event(3)).await, 1);
        assert!(rx_ok.try_recv().is_ok());
        assert!(rx_ok.try_recv().is_ok());
    }
}
