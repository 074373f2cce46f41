//! WatchService gRPC implementation.
//!
//! Viewer streams are workspace-scoped and driven by explicit subscribe
//! and unsubscribe control messages. Share streams authenticate with a
//! share token and are pinned to that token's agent; their subscriptions
//! can only narrow within it.

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, instrument, warn};

use netbeacon_proto::v1::watch_request::Action;
use netbeacon_proto::v1::watch_service_server::WatchService;
use netbeacon_proto::v1::{EventPush, ShareWatchRequest, WatchRequest};

use crate::hub::next_conn_id;
use crate::hub::subscription::{SubscriptionHub, PROBE_WILDCARD};
use crate::server::metadata::share_token;
use crate::storage::ControllerDatabase;

const EVENT_CHANNEL_CAP: usize = 64;

type EventStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<EventPush, Status>> + Send>>;

pub struct WatchServiceImpl {
    db: ControllerDatabase,
    viewers: Arc<SubscriptionHub>,
    shares: Arc<SubscriptionHub>,
}

impl WatchServiceImpl {
    pub fn new(
        db: ControllerDatabase,
        viewers: Arc<SubscriptionHub>,
        shares: Arc<SubscriptionHub>,
    ) -> Self {
        Self {
            db,
            viewers,
            shares,
        }
    }
}

#[tonic::async_trait]
impl WatchService for WatchServiceImpl {
    type WatchStream = EventStream;

    #[instrument(skip(self, request), fields(rpc = "Watch"))]
    async fn watch(
        &self,
        request: Request<Streaming<WatchRequest>>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let mut in_stream = request.into_inner();

        let conn_id = next_conn_id();
        let (event_tx, event_rx) = mpsc::channel::<EventPush>(EVENT_CHANNEL_CAP);
        self.viewers.connect(conn_id, event_tx).await;
        info!(conn_id, "Viewer stream opened");

        let hub = Arc::clone(&self.viewers);
        tokio::spawn(async move {
            while let Some(msg) = in_stream.next().await {
                match msg {
                    Ok(req) => match req.action() {
                        Action::Subscribe => {
                            hub.subscribe(conn_id, req.workspace_id, req.probe_id).await;
                        }
                        Action::Unsubscribe => {
                            hub.unsubscribe(conn_id, req.workspace_id, req.probe_id).await;
                        }
                        Action::Unspecified => {
                            warn!(conn_id, "Viewer control message without action");
                        }
                    },
                    Err(e) => {
                        warn!(conn_id, error = %e, "Viewer control stream error");
                        break;
                    }
                }
            }

            // Teardown drops the event sender, which ends the out stream
            hub.disconnect(conn_id).await;
            info!(conn_id, "Viewer stream closed");
        });

        let out_stream = ReceiverStream::new(event_rx).map(Ok);
        Ok(Response::new(Box::pin(out_stream)))
    }

    type WatchSharedStream = EventStream;

    #[instrument(skip(self, request), fields(rpc = "WatchShared"))]
    async fn watch_shared(
        &self,
        request: Request<Streaming<ShareWatchRequest>>,
    ) -> Result<Response<Self::WatchSharedStream>, Status> {
        let token = share_token(request.metadata())
            .ok_or_else(|| Status::unauthenticated("Missing share token"))?
            .to_owned();

        let share = self
            .db
            .get_share_token(&token)
            .await
            .map_err(|e| {
                warn!(error = %e, "Share token lookup failed");
                Status::internal("Storage failure")
            })?
            .ok_or_else(|| Status::unauthenticated("Unauthorized"))?;
        let agent_id = share.agent_id;

        let mut in_stream = request.into_inner();

        let conn_id = next_conn_id();
        let (event_tx, event_rx) = mpsc::channel::<EventPush>(EVENT_CHANNEL_CAP);
        self.shares.connect(conn_id, event_tx).await;
        // Share streams start with the whole agent in view
        self.shares.subscribe(conn_id, agent_id, PROBE_WILDCARD).await;
        info!(conn_id, agent_id, "Share stream opened");

        let hub = Arc::clone(&self.shares);
        tokio::spawn(async move {
            while let Some(msg) = in_stream.next().await {
                match msg {
                    Ok(req) => match Action::try_from(req.action).unwrap_or(Action::Unspecified) {
                        Action::Subscribe => {
                            hub.subscribe(conn_id, agent_id, req.probe_id).await;
                        }
                        Action::Unsubscribe => {
                            hub.unsubscribe(conn_id, agent_id, req.probe_id).await;
                        }
                        Action::Unspecified => {
                            warn!(conn_id, "Share control message without action");
                        }
                    },
                    Err(e) => {
                        warn!(conn_id, error = %e, "Share control stream error");
                        break;
                    }
                }
            }

            hub.disconnect(conn_id).await;
            info!(conn_id, agent_id, "Share stream closed");
        });

        let out_stream = ReceiverStream::new(event_rx).map(Ok);
        Ok(Response::new(Box::pin(out_stream)))
    }
}
