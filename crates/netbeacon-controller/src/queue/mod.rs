//! Speed-test job queue.
//!
//! Jobs are requested on behalf of an agent, delivered over the agent's
//! live command stream when possible, and otherwise picked up when the
//! agent polls. Completions re-enter the ordinary telemetry dispatch
//! path so queued results are stored and fanned out exactly like
//! scheduled ones.

use std::sync::Arc;
use std::time::Duration;

use netbeacon_proto::v1::agent_frame::Frame;
use netbeacon_proto::v1::{AgentFrame, SpeedTestJob};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{DispatchError, Dispatcher, Envelope};
use crate::hub::agent::AgentHub;
use crate::storage::{ControllerDatabase, DatabaseError, QueueItem};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue item not pending: {0}")]
    NotPending(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

pub struct SpeedTestQueue {
    db: ControllerDatabase,
    agents: Arc<AgentHub>,
    /// PENDING items older than this are expired by the sweep.
    expiry_secs: i64,
}

impl SpeedTestQueue {
    pub const fn new(db: ControllerDatabase, agents: Arc<AgentHub>, expiry_secs: i64) -> Self {
        Self {
            db,
            agents,
            expiry_secs,
        }
    }

    /// Create a PENDING job and try to push it to the agent's live
    /// stream. Push failure is not an error; the agent will find the job
    /// on its next poll.
    pub async fn enqueue(
        &self,
        workspace_id: i64,
        agent_id: i64,
        server_id: &str,
        server_name: &str,
        requested_by: &str,
    ) -> Result<QueueItem, QueueError> {
        let id = Uuid::new_v4().to_string();
        let item = self
            .db
            .enqueue_speedtest(&id, workspace_id, agent_id, server_id, server_name, requested_by)
            .await?;

        let frame = AgentFrame {
            frame: Some(Frame::Job(SpeedTestJob {
                queue_id: item.id.clone(),
                server_id: item.server_id.clone(),
                server_name: item.server_name.clone(),
            })),
        };
        if self.agents.send_to_agent(agent_id, frame).await {
            info!(queue_id = %item.id, agent_id, "Speed-test job pushed to live agent");
        } else {
            debug!(queue_id = %item.id, agent_id, "Agent offline, job waits for poll");
        }

        Ok(item)
    }

    /// PENDING jobs for an agent, expiring stale ones first so a poll
    /// never hands out a job the sweep was about to kill.
    pub async fn pending_for_agent(&self, agent_id: i64) -> Result<Vec<QueueItem>, QueueError> {
        self.sweep().await?;
        Ok(self.db.pending_for_agent(agent_id).await?)
    }

    /// Record a successful run and dispatch its result envelope.
    ///
    /// The state transition happens first; once an item leaves PENDING a
    /// second completion (or the expiry sweep) can no longer touch it.
    pub async fn complete(
        &self,
        dispatcher: &Dispatcher,
        queue_id: &str,
        result: &Envelope,
    ) -> Result<(), QueueError> {
        if !self.db.mark_queue_completed(queue_id).await? {
            warn!(queue_id, "Completion for non-pending queue item");
            return Err(QueueError::NotPending(queue_id.to_owned()));
        }

        dispatcher.dispatch(result).await?;
        info!(queue_id, agent_id = result.agent_id, "Speed-test job completed");
        Ok(())
    }

    /// Record a failed run.
    pub async fn fail(&self, queue_id: &str, error: &str) -> Result<(), QueueError> {
        if !self.db.mark_queue_failed(queue_id, error).await? {
            return Err(QueueError::NotPending(queue_id.to_owned()));
        }
        info!(queue_id, error, "Speed-test job failed");
        Ok(())
    }

    /// Remove a PENDING job before any agent picks it up.
    pub async fn cancel(&self, queue_id: &str) -> Result<bool, QueueError> {
        Ok(self.db.cancel_queue_item(queue_id).await?)
    }

    /// Expire PENDING items past the deadline. Returns the count.
    pub async fn sweep(&self) -> Result<u64, QueueError> {
        let expired = self.db.expire_stale_queue_items(self.expiry_secs).await?;
        if expired > 0 {
            info!(expired, "Expired stale speed-test jobs");
        }
        Ok(expired)
    }

    /// Spawn the periodic expiry task. The immediate first tick is
    /// skipped.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    warn!(error = %e, "Speed-test queue sweep failed");
                }
            }
        })
    }
}
