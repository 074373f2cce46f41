//! PIN and PSK generation plus constant-time PSK verification.
//!
//! PINs are short, numeric, single-use bootstrap secrets typed by an
//! operator; PSKs are long random bearer secrets minted in exchange for a
//! valid PIN. Only the SHA-256 hash of a PSK is ever stored.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Alphabet used for bootstrap PINs. Digits only so the PIN survives
/// being read over the phone or typed on a constrained device.
const PIN_ALPHABET: &[u8] = b"0123456789";

/// Number of random bytes in a freshly minted PSK.
const PSK_BYTES: usize = 32;

/// Generate a numeric bootstrap PIN of the given length.
pub fn generate_pin(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| {
            // Rejection sampling keeps the distribution uniform.
            loop {
                let b = (rng.next_u32() & 0xFF) as u8;
                if (b as usize) < PIN_ALPHABET.len() * (256 / PIN_ALPHABET.len()) {
                    break PIN_ALPHABET[b as usize % PIN_ALPHABET.len()] as char;
                }
            }
        })
        .collect()
}

/// Generate a fresh PSK, hex-encoded (64 characters).
pub fn generate_psk() -> String {
    let mut bytes = [0u8; PSK_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a single-use nonce, hex-encoded (64 characters). Used both
/// for bootstrap challenges and for signed-request replay prevention.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a PSK for storage, hex-encoded SHA-256.
pub fn hash_psk(psk: &str) -> String {
    hex::encode(Sha256::digest(psk.as_bytes()))
}

/// Verify a presented PSK against a stored hash in constant time.
pub fn verify_psk(presented: &str, stored_hash: &str) -> bool {
    let Ok(stored) = hex::decode(stored_hash) else {
        return false;
    };
    let computed = Sha256::digest(presented.as_bytes());
    if stored.len() != computed.len() {
        return false;
    }
    computed.as_slice().ct_eq(&stored).into()
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn pin_has_requested_length_and_alphabet() {
        for len in [4, 6, 8] {
            let pin = generate_pin(len);
            assert_eq!(pin.len(), len);
            assert!(pin.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn psk_is_64_hex_chars() {
        let psk = generate_psk();
        assert_eq!(psk.len(), 64);
        assert!(psk.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn two_psks_are_distinct() {
        assert_ne!(generate_psk(), generate_psk());
    }

    #[test]
    fn nonces_are_distinct_hex() {
        let n1 = generate_nonce();
        let n2 = generate_nonce();
        assert_eq!(n1.len(), 64);
        assert_ne!(n1, n2);
    }

    #[test]
    fn hash_and_verify() {
        let psk = generate_psk();
        let hash = hash_psk(&psk);
        assert!(verify_psk(&psk, &hash));
        assert!(!verify_psk("wrong-secret", &hash));
    }

    #[test]
    fn garbage_stored_hash_never_verifies() {
        assert!(!verify_psk("anything", "not-hex"));
        assert!(!verify_psk("anything", "abcd"));
    }
}
