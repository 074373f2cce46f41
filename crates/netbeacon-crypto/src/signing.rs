//! Ed25519 signing and verification for agent authentication.
//!
//! Agents hold a long-lived Ed25519 keypair. The public key is registered
//! with the controller once, by signing a server-issued challenge nonce.
//! After that, every request is signed over a canonical string so the
//! controller can verify origin and integrity without a shared secret.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use netbeacon_core::db::base64_encode;

use crate::error::CryptoError;

/// Length in bytes of an Ed25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// An Ed25519 keypair held by an agent.
pub struct AgentKeyPair {
    signing: SigningKey,
}

impl std::fmt::Debug for AgentKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentKeyPair")
            .field("public", &hex::encode(self.public_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl AgentKeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct from raw 32-byte secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self {
            signing: SigningKey::from_bytes(&arr),
        })
    }

    /// The public key as raw bytes.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    /// Sign an arbitrary message, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }
}

/// Verify a detached Ed25519 signature over `message`.
pub fn verify_detached(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let key_bytes: [u8; PUBLIC_KEY_LEN] =
        public_key
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_LEN,
                actual: public_key.len(),
            })?;
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::MalformedKey)?;
    let sig = Signature::from_slice(signature).map_err(|_| CryptoError::MalformedSignature)?;
    key.verify(message, &sig)
        .map_err(|_| CryptoError::BadSignature)
}

/// Build the canonical string signed on every agent request:
///
/// ```text
/// METHOD \n PATH \n base64(sha256(body)) \n timestamp \n nonce
/// ```
///
/// Both sides must produce this byte-for-byte identically, so the digest
/// is always computed over the raw body bytes (empty body included).
pub fn canonical_request(
    method: &str,
    path: &str,
    body: &[u8],
    timestamp: i64,
    nonce: &str,
) -> String {
    let digest = base64_encode(&Sha256::digest(body));
    format!("{method}\n{path}\n{digest}\n{timestamp}\n{nonce}")
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = AgentKeyPair::generate();
        let sig = kp.sign(b"challenge-nonce");
        verify_detached(&kp.public_bytes(), b"challenge-nonce", &sig).unwrap();
    }

    #[test]
    fn wrong_message_fails() {
        let kp = AgentKeyPair::generate();
        let sig = kp.sign(b"challenge-nonce");
        let err = verify_detached(&kp.public_bytes(), b"other-message", &sig).unwrap_err();
        assert!(matches!(err, CryptoError::BadSignature));
    }

    #[test]
    fn wrong_key_fails() {
        let kp = AgentKeyPair::generate();
        let other = AgentKeyPair::generate();
        let sig = kp.sign(b"msg");
        assert!(verify_detached(&other.public_bytes(), b"msg", &sig).is_err());
    }

    #[test]
    fn truncated_key_is_rejected() {
        let kp = AgentKeyPair::generate();
        let sig = kp.sign(b"msg");
        let err = verify_detached(&kp.public_bytes()[..16], b"msg", &sig).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { .. }));
    }

    #[test]
    fn keypair_roundtrip_from_secret_bytes() {
        let kp = AgentKeyPair::generate();
        let secret = kp.signing.to_bytes();
        let kp2 = AgentKeyPair::from_secret_bytes(&secret).unwrap();
        assert_eq!(kp.public_bytes(), kp2.public_bytes());
    }

    #[test]
    fn canonical_request_is_stable() {
        let a = canonical_request("POST", "/netbeacon.v1.AgentService/Submit", b"{}", 1700, "n1");
        let b = canonical_request("POST", "/netbeacon.v1.AgentService/Submit", b"{}", 1700, "n1");
        assert_eq!(a, b);
        assert_eq!(a.split('\n').count(), 5);
    }

    #[test]
    fn canonical_request_differs_per_field() {
        let base = canonical_request("POST", "/p", b"body", 1700, "n1");
        assert_ne!(base, canonical_request("GET", "/p", b"body", 1700, "n1"));
        assert_ne!(base, canonical_request("POST", "/q", b"body", 1700, "n1"));
        assert_ne!(base, canonical_request("POST", "/p", b"other", 1700, "n1"));
        assert_ne!(base, canonical_request("POST", "/p", b"body", 1701, "n1"));
        assert_ne!(base, canonical_request("POST", "/p", b"body", 1700, "n2"));
    }

    #[test]
    fn debug_impl_redacts_secret() {
        let kp = AgentKeyPair::generate();
        let debug_output = format!("{kp:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains(&hex::encode(kp.signing.to_bytes())));
    }
}
