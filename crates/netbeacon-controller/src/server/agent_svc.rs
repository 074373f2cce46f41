//! AgentService gRPC implementation.

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{error, info, instrument, warn};

use netbeacon_proto::v1::agent_frame::Frame;
use netbeacon_proto::v1::agent_service_server::AgentService;
use netbeacon_proto::v1::{
    AgentFrame, CompleteJobRequest, CompleteJobResponse, PendingJobsRequest, PendingJobsResponse,
    SpeedTestJob, SubmitRequest, SubmitResponse,
};

use crate::auth::{PskAuthenticator, SignedRequestVerifier};
use crate::dispatch::{DispatchError, Dispatcher, Envelope};
use crate::hub::agent::AgentHub;
use crate::queue::{QueueError, SpeedTestQueue};
use crate::server::metadata::authenticate_agent;
use crate::storage::ControllerDatabase;

const SUBMIT_PATH: &str = "/netbeacon.v1.AgentService/Submit";
const CONNECT_PATH: &str = "/netbeacon.v1.AgentService/Connect";
const PENDING_JOBS_PATH: &str = "/netbeacon.v1.AgentService/PendingJobs";
const COMPLETE_JOB_PATH: &str = "/netbeacon.v1.AgentService/CompleteJob";

type ConnectStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<AgentFrame, Status>> + Send>>;

pub struct AgentServiceImpl {
    db: ControllerDatabase,
    psk_auth: PskAuthenticator,
    verifier: SignedRequestVerifier,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<SpeedTestQueue>,
    agents: Arc<AgentHub>,
}

impl AgentServiceImpl {
    pub fn new(
        db: ControllerDatabase,
        psk_auth: PskAuthenticator,
        verifier: SignedRequestVerifier,
        dispatcher: Arc<Dispatcher>,
        queue: Arc<SpeedTestQueue>,
        agents: Arc<AgentHub>,
    ) -> Self {
        Self {
            db,
            psk_auth,
            verifier,
            dispatcher,
            queue,
            agents,
        }
    }
}

fn map_dispatch_err(err: DispatchError) -> Status {
    match err {
        DispatchError::UnknownKind(_)
        | DispatchError::MalformedPayload
        | DispatchError::InvalidPayload(_) => Status::invalid_argument(err.to_string()),
        DispatchError::Storage(e) => {
            error!(error = %e, "Storage failure during dispatch");
            Status::internal("Storage failure")
        }
    }
}

#[tonic::async_trait]
impl AgentService for AgentServiceImpl {
    #[instrument(skip(self, request), fields(rpc = "Submit"))]
    async fn submit(
        &self,
        request: Request<SubmitRequest>,
    ) -> Result<Response<SubmitResponse>, Status> {
        let proto = request
            .get_ref()
            .envelope
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("Missing envelope"))?;

        let agent = authenticate_agent(
            &self.psk_auth,
            &self.verifier,
            request.metadata(),
            SUBMIT_PATH,
            &proto.payload,
        )
        .await?;

        if proto.agent_id != agent.agent_id {
            warn!(
                agent_id = agent.agent_id,
                claimed = proto.agent_id,
                "Envelope agent id does not match credentials"
            );
            return Err(Status::permission_denied("Envelope agent mismatch"));
        }

        let envelope = Envelope::from_proto(proto).map_err(map_dispatch_err)?;
        self.dispatcher
            .dispatch(&envelope)
            .await
            .map_err(map_dispatch_err)?;

        Ok(Response::new(SubmitResponse { accepted: true }))
    }

    type ConnectStream = ConnectStream;

    #[instrument(skip(self, request), fields(rpc = "Connect"))]
    async fn connect(
        &self,
        request: Request<Streaming<AgentFrame>>,
    ) -> Result<Response<Self::ConnectStream>, Status> {
        let agent = authenticate_agent(
            &self.psk_auth,
            &self.verifier,
            request.metadata(),
            CONNECT_PATH,
            &[],
        )
        .await?;
        let agent_id = agent.agent_id;

        let mut in_stream = request.into_inner();

        // Hub-to-agent job frames
        let (frame_tx, mut frame_rx) = mpsc::channel::<AgentFrame>(64);
        // Output stream back to the agent
        let (out_tx, out_rx) = mpsc::channel::<Result<AgentFrame, Status>>(64);

        let (conn_id, mut close_rx) = self.agents.register(agent_id, frame_tx).await;
        info!(agent_id, conn_id, "Agent connected");

        let agents = Arc::clone(&self.agents);
        let db = self.db.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = close_rx.changed() => {
                        if changed.is_err() || *close_rx.borrow() {
                            info!(agent_id, conn_id, "Agent stream superseded");
                            break;
                        }
                    }
                    frame = frame_rx.recv() => {
                        let Some(frame) = frame else { break };
                        if out_tx.send(Ok(frame)).await.is_err() {
                            break;
                        }
                    }
                    incoming = in_stream.next() => {
                        match incoming {
                            Some(Ok(frame)) => {
                                if let Some(Frame::Heartbeat(_)) = frame.frame {
                                    if let Err(e) = db.touch_agent(agent_id).await {
                                        warn!(agent_id, error = %e, "Failed to stamp heartbeat");
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                warn!(agent_id, conn_id, error = %e, "Agent stream error");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            agents.unregister(agent_id, conn_id).await;
            info!(agent_id, conn_id, "Agent disconnected");
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(out_rx))))
    }

    #[instrument(skip(self, request), fields(rpc = "PendingJobs"))]
    async fn pending_jobs(
        &self,
        request: Request<PendingJobsRequest>,
    ) -> Result<Response<PendingJobsResponse>, Status> {
        let agent = authenticate_agent(
            &self.psk_auth,
            &self.verifier,
            request.metadata(),
            PENDING_JOBS_PATH,
            &[],
        )
        .await?;

        let items = self
            .queue
            .pending_for_agent(agent.agent_id)
            .await
            .map_err(|e| {
                error!(agent_id = agent.agent_id, error = %e, "Failed to list pending jobs");
                Status::internal("Storage failure")
            })?;

        let jobs = items
            .into_iter()
            .map(|item| SpeedTestJob {
                queue_id: item.id,
                server_id: item.server_id,
                server_name: item.server_name,
            })
            .collect();

        Ok(Response::new(PendingJobsResponse { jobs }))
    }

    #[instrument(skip(self, request), fields(rpc = "CompleteJob"))]
    async fn complete_job(
        &self,
        request: Request<CompleteJobRequest>,
    ) -> Result<Response<CompleteJobResponse>, Status> {
        let body = request
            .get_ref()
            .result
            .as_ref()
            .map(|r| r.payload.clone())
            .unwrap_or_default();

        let agent = authenticate_agent(
            &self.psk_auth,
            &self.verifier,
            request.metadata(),
            COMPLETE_JOB_PATH,
            &body,
        )
        .await?;

        let req = request.into_inner();
        let item = self
            .queue
            .pending_for_agent(agent.agent_id)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to check pending jobs");
                Status::internal("Storage failure")
            })?
            .into_iter()
            .find(|item| item.id == req.queue_id)
            .ok_or_else(|| Status::not_found("No pending job with that id for this agent"))?;

        if req.success {
            let proto = req
                .result
                .ok_or_else(|| Status::invalid_argument("Successful completion requires a result"))?;
            if proto.agent_id != agent.agent_id {
                return Err(Status::permission_denied("Result agent mismatch"));
            }
            let envelope = Envelope::from_proto(&proto).map_err(map_dispatch_err)?;
            self.queue
                .complete(&self.dispatcher, &item.id, &envelope)
                .await
                .map_err(|e| match e {
                    QueueError::NotPending(id) => {
                        Status::failed_precondition(format!("Queue item not pending: {id}"))
                    }
                    QueueError::Dispatch(d) => map_dispatch_err(d),
                    QueueError::Storage(s) => {
                        error!(error = %s, "Storage failure completing job");
                        Status::internal("Storage failure")
                    }
                })?;
        } else {
            self.queue.fail(&item.id, &req.error).await.map_err(|e| {
                error!(error = %e, "Failed to record job failure");
                Status::internal("Storage failure")
            })?;
        }

        Ok(Response::new(CompleteJobResponse { accepted: true }))
    }
}
