//! BootstrapService gRPC implementation.
//!
//! The PIN is the only credential on this surface. Every rejection maps
//! to the same unauthenticated status through
//! [`super::metadata::map_auth_err`], so callers cannot distinguish a
//! wrong PIN from a missing challenge or a bad signature.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::instrument;

use netbeacon_core::db::unix_timestamp;
use netbeacon_proto::v1::bootstrap_service_server::BootstrapService;
use netbeacon_proto::v1::{
    CreateChallengeRequest, CreateChallengeResponse, ExchangePinRequest, ExchangePinResponse,
    RegisterKeyRequest, RegisterKeyResponse,
};

use crate::auth::{ChallengeStore, PskAuthenticator};
use crate::server::metadata::map_auth_err;

pub struct BootstrapServiceImpl {
    psk_auth: PskAuthenticator,
    challenges: Arc<ChallengeStore>,
    challenge_ttl_secs: i64,
}

impl BootstrapServiceImpl {
    pub const fn new(
        psk_auth: PskAuthenticator,
        challenges: Arc<ChallengeStore>,
        challenge_ttl_secs: i64,
    ) -> Self {
        Self {
            psk_auth,
            challenges,
            challenge_ttl_secs,
        }
    }
}

#[tonic::async_trait]
impl BootstrapService for BootstrapServiceImpl {
    #[instrument(skip(self, request), fields(rpc = "ExchangePin"))]
    async fn exchange_pin(
        &self,
        request: Request<ExchangePinRequest>,
    ) -> Result<Response<ExchangePinResponse>, Status> {
        let req = request.into_inner();

        let psk = self
            .psk_auth
            .exchange_pin(req.workspace_id, req.agent_id, &req.pin)
            .await
            .map_err(map_auth_err)?;

        Ok(Response::new(ExchangePinResponse { psk }))
    }

    #[instrument(skip(self, request), fields(rpc = "CreateChallenge"))]
    async fn create_challenge(
        &self,
        request: Request<CreateChallengeRequest>,
    ) -> Result<Response<CreateChallengeResponse>, Status> {
        let req = request.into_inner();

        let nonce = self
            .challenges
            .create_challenge(req.workspace_id, req.agent_id, &req.pin)
            .await
            .map_err(map_auth_err)?;

        Ok(Response::new(CreateChallengeResponse {
            nonce,
            expires_at: unix_timestamp() + self.challenge_ttl_secs,
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "RegisterKey"))]
    async fn register_key(
        &self,
        request: Request<RegisterKeyRequest>,
    ) -> Result<Response<RegisterKeyResponse>, Status> {
        let req = request.into_inner();

        self.challenges
            .register_key(
                req.workspace_id,
                req.agent_id,
                &req.pin,
                &req.nonce,
                &req.public_key,
                &req.signature,
            )
            .await
            .map_err(map_auth_err)?;

        Ok(Response::new(RegisterKeyResponse { registered: true }))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use netbeacon_crypto::signing::AgentKeyPair;

    use super::*;
    use crate::storage::ControllerDatabase;

    async fn setup() -> (BootstrapServiceImpl, ControllerDatabase, String) {
        let db = ControllerDatabase::open_in_memory().await.unwrap();
        db.create_agent(42, 5).await.unwrap();
        let pin = db.issue_pin(42, 5, 300).await.unwrap().pin;
        let svc = BootstrapServiceImpl::new(
            PskAuthenticator::new(db.clone()),
            Arc::new(ChallengeStore::new(db.clone(), 90)),
            90,
        );
        (svc, db, pin)
    }

    #[tokio::test]
    async fn full_bootstrap_over_grpc_surface() {
        let (svc, db, pin) = setup().await;

        let psk = svc
            .exchange_pin(Request::new(ExchangePinRequest {
                workspace_id: 5,
                agent_id: 42,
                pin: pin.clone(),
            }))
            .await
            .unwrap()
            .into_inner()
            .psk;
        assert_eq!(psk.len(), 64);

        let challenge = svc
            .create_challenge(Request::new(CreateChallengeRequest {
                workspace_id: 5,
                agent_id: 42,
                pin: pin.clone(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(challenge.expires_at > unix_timestamp());

        let keys = AgentKeyPair::generate();
        let resp = svc
            .register_key(Request::new(RegisterKeyRequest {
                workspace_id: 5,
                agent_id: 42,
                pin,
                public_key: keys.public_bytes().to_vec(),
                nonce: challenge.nonce.clone(),
                signature: keys.sign(challenge.nonce.as_bytes()),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.registered);

        let agent = db.get_agent(42).await.unwrap();
        assert!(agent.public_key.is_some());
        assert_eq!(agent.initialized, 1);
    }

    #[tokio::test]
    async fn wrong_pin_is_a_generic_unauthenticated() {
        let (svc, _db, pin) = setup().await;

        let err = svc
            .exchange_pin(Request::new(ExchangePinRequest {
                workspace_id: 5,
                agent_id: 42,
                pin: "not-the-pin".to_owned(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);

        let err = svc
            .create_challenge(Request::new(CreateChallengeRequest {
                workspace_id: 9,
                agent_id: 42,
                pin,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);
    }
}
