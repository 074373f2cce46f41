//! Registry of live agent command streams.
//!
//! Each agent keeps at most one live `Connect` stream. A reconnect
//! replaces the map entry immediately so new frames go to the fresh
//! stream, while the superseded connection is told to close only after a
//! grace period, giving its in-flight frames time to drain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use netbeacon_proto::v1::AgentFrame;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

use super::next_conn_id;

/// One live agent command stream.
pub struct AgentConnection {
    pub conn_id: u64,
    pub agent_id: i64,
    frame_tx: mpsc::Sender<AgentFrame>,
    close_tx: watch::Sender<bool>,
}

impl AgentConnection {
    /// Queue a frame without waiting. Returns `false` when the stream's
    /// buffer is full or the receiver is gone.
    pub fn try_send(&self, frame: AgentFrame) -> bool {
        self.frame_tx.try_send(frame).is_ok()
    }

    fn signal_close(&self) {
        let _ = self.close_tx.send(true);
    }
}

/// Tracks which agents currently hold a live command stream.
pub struct AgentHub {
    entries: Arc<RwLock<HashMap<i64, Arc<AgentConnection>>>>,
    grace: Duration,
}

impl AgentHub {
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            grace,
        }
    }

    /// Register a new command stream for an agent.
    ///
    /// Returns the connection id and a watch receiver that flips to
    /// `true` when the connection should shut down.
    pub async fn register(
        &self,
        agent_id: i64,
        frame_tx: mpsc::Sender<AgentFrame>,
    ) -> (u64, watch::Receiver<bool>) {
        let conn_id = next_conn_id();
        let (close_tx, close_rx) = watch::channel(false);
        let conn = Arc::new(AgentConnection {
            conn_id,
            agent_id,
            frame_tx,
            close_tx,
        });

        let previous = self.entries.write().await.insert(agent_id, conn);
        info!(agent_id, conn_id, "Agent stream registered");

        if let Some(old) = previous {
            debug!(agent_id, old_conn_id = old.conn_id, "Superseding existing agent stream");
            let entries = Arc::clone(&self.entries);
            let grace = self.grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let still_current = entries
                    .read()
                    .await
                    .get(&old.agent_id)
                    .is_some_and(|c| c.conn_id == old.conn_id);
                if !still_current {
                    old.signal_close();
                }
            });
        }

        (conn_id, close_rx)
    }

    /// Remove an agent's entry, but only if it still belongs to the given
    /// connection. A reconnect that already replaced the entry must not
    /// be torn down by the old stream's cleanup.
    pub async fn unregister(&self, agent_id: i64, conn_id: u64) {
        let mut entries = self.entries.write().await;
        if entries.get(&agent_id).is_some_and(|c| c.conn_id == conn_id) {
            entries.remove(&agent_id);
            info!(agent_id, conn_id, "Agent stream unregistered");
        }
    }

    /// Best-effort frame delivery to an agent's live stream.
    pub async fn send_to_agent(&self, agent_id: i64, frame: AgentFrame) -> bool {
        let entries = self.entries.read().await;
        let Some(conn) = entries.get(&agent_id) else {
            return false;
        };
        let sent = conn.try_send(frame);
        if !sent {
            warn!(agent_id, conn_id = conn.conn_id, "Dropped frame for slow agent stream");
        }
        sent
    }

    pub async fn is_connected(&self, agent_id: i64) -> bool {
        self.entries.read().await.contains_key(&agent_id)
    }
}
