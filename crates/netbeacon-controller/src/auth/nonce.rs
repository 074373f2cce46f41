//! Replay-prevention nonce store for signed requests.

use std::collections::HashMap;
use std::sync::Mutex;

use netbeacon_core::db::unix_timestamp;

/// In-memory set of recently seen signed-request nonces.
///
/// A nonce only needs to be remembered while its request timestamp is
/// inside the acceptance window; entries older than twice the clock-skew
/// allowance are pruned opportunistically on insert.
pub struct NonceStore {
    seen: Mutex<HashMap<String, i64>>,
    skew_secs: i64,
}

impl NonceStore {
    pub fn new(skew_secs: i64) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            skew_secs,
        }
    }

    /// Record a nonce. Returns `false` if it was already present, which
    /// means the request is a replay.
    pub fn insert_once(&self, nonce: &str) -> bool {
        let now = unix_timestamp();
        let horizon = now - self.skew_secs * 2;

        let mut seen = self.seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        seen.retain(|_, seen_at| *seen_at >= horizon);

        if seen.contains_key(nonce) {
            return false;
        }
        seen.insert(nonce.to_owned(), now);
        true
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn nonce_is_single_use() {
        let store = NonceStore::new(90);
        assert!(store.insert_once("n1"));
        assert!(!store.insert_once("n1"));
        assert!(store.insert_once("n2"));
    }

    #[test]
    fn old_entries_are_pruned() {
        let store = NonceStore::new(90);
        assert!(store.insert_once("old"));
        {
            let mut seen = store.seen.lock().unwrap();
            if let Some(at) = seen.get_mut("old") {
                *at -= 1_000;
            }
        }
        assert!(store.insert_once("fresh"));
        assert_eq!(store.len(), 1);
    }
}
