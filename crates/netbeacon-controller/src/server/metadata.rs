//! Credential extraction from gRPC request metadata.
//!
//! Agents authenticate with one of two metadata sets:
//!   PSK:    x-workspace-id, x-agent-id, x-agent-psk
//!   Signed: x-agent-id, x-agent-nonce, x-agent-timestamp, x-agent-signature
//!
//! The signature header is hex-encoded; the signed message is the
//! canonical request string over "POST", the RPC path, and the body the
//! caller names.

use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::auth::{AuthError, PskAuthenticator, SignedHeaders, SignedRequestVerifier};
use crate::storage::Agent;

pub const WORKSPACE_ID_HEADER: &str = "x-workspace-id";
pub const AGENT_ID_HEADER: &str = "x-agent-id";
pub const PSK_HEADER: &str = "x-agent-psk";
pub const NONCE_HEADER: &str = "x-agent-nonce";
pub const TIMESTAMP_HEADER: &str = "x-agent-timestamp";
pub const SIGNATURE_HEADER: &str = "x-agent-signature";
pub const SHARE_TOKEN_HEADER: &str = "x-share-token";

fn header_str<'a>(md: &'a MetadataMap, name: &str) -> Option<&'a str> {
    md.get(name).and_then(|v| v.to_str().ok())
}

fn header_i64(md: &MetadataMap, name: &str) -> Option<i64> {
    header_str(md, name)?.parse().ok()
}

/// PSK credential triple, if all three headers are present.
pub fn psk_credentials(md: &MetadataMap) -> Option<(i64, i64, String)> {
    let workspace_id = header_i64(md, WORKSPACE_ID_HEADER)?;
    let agent_id = header_i64(md, AGENT_ID_HEADER)?;
    let psk = header_str(md, PSK_HEADER)?.to_owned();
    Some((workspace_id, agent_id, psk))
}

/// Signed-request headers, if all four are present and well-formed.
pub fn signed_headers(md: &MetadataMap) -> Option<SignedHeaders> {
    let agent_id = header_i64(md, AGENT_ID_HEADER)?;
    let nonce = header_str(md, NONCE_HEADER)?.to_owned();
    let timestamp = header_i64(md, TIMESTAMP_HEADER)?;
    let signature = hex::decode(header_str(md, SIGNATURE_HEADER)?).ok()?;
    Some(SignedHeaders {
        agent_id,
        nonce,
        timestamp,
        signature,
    })
}

pub fn share_token(md: &MetadataMap) -> Option<&str> {
    header_str(md, SHARE_TOKEN_HEADER)
}

/// Authenticate a request by whichever credential set its metadata
/// carries. Signed headers win when both are present.
pub async fn authenticate_agent(
    psk_auth: &PskAuthenticator,
    verifier: &SignedRequestVerifier,
    md: &MetadataMap,
    path: &str,
    body: &[u8],
) -> Result<Agent, Status> {
    if let Some(headers) = signed_headers(md) {
        return verifier
            .verify(&headers, "POST", path, body)
            .await
            .map_err(map_auth_err);
    }
    if let Some((workspace_id, agent_id, psk)) = psk_credentials(md) {
        return psk_auth
            .verify_login(workspace_id, agent_id, &psk)
            .await
            .map_err(map_auth_err);
    }
    Err(Status::unauthenticated("Missing credentials"))
}

/// Map auth failures onto gRPC statuses. Everything except the explicit
/// deleted-agent signal and storage trouble collapses to a uniform
/// unauthenticated status.
pub fn map_auth_err(err: AuthError) -> Status {
    match err {
        AuthError::AgentDeleted => Status::failed_precondition("Agent has been deleted"),
        AuthError::Storage(e) => {
            tracing::error!(error = %e, "Storage failure during authentication");
            Status::internal("Storage failure")
        }
        AuthError::Unauthorized => Status::unauthenticated("Unauthorized"),
    }
}
