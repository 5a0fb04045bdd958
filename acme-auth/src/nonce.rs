//! Single-use anti-replay tokens (§4.1).
//!
//! Nonces are opaque high-entropy strings (the original implementation uses
//! `uuid4().hex`; this reference uses `ring::rand` to the same effect,
//! §10.6). Strict monotonic ordering is not required by ACME, only
//! unguessability and single use, so the store is a bounded LRU set rather
//! than a sequence counter: once `capacity` nonces are outstanding, issuing
//! a new one evicts the oldest, which simply means a sufficiently old,
//! never-consumed nonce becomes unconditionally invalid - acceptable
//! because a legitimate client consumes its nonce within one request.
//!
//! This is the only component in the core permitted to hold process-wide
//! mutable state (§9); `parking_lot::Mutex` keeps issue/consume cheap and
//! synchronous so it never becomes a suspension point in the request path.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use ring::rand::{SecureRandom, SystemRandom};

/// Lowercase hex encoding, no external crate needed for 16 bytes.
fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02x}").expect("writing to a String cannot fail");
    }
    out
}

pub struct NonceStore {
    rng: SystemRandom,
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    live: HashSet<String>,
    order: VecDeque<String>,
}

impl NonceStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            rng: SystemRandom::new(),
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                live: HashSet::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Issue a fresh nonce, evicting the oldest outstanding one if the
    /// working set is at capacity. Rendered as 32 lowercase hex characters,
    /// matching the original implementation's `uuid4().hex` format (§10.6,
    /// §8 scenario 1) rather than base64url.
    pub fn issue(&self) -> String {
        let mut bytes = [0u8; 16];
        self.rng
            .fill(&mut bytes)
            .expect("system RNG must be available");
        let nonce = hex_encode(&bytes);

        let mut inner = self.inner.lock();
        if inner.order.len() >= self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.live.remove(&evicted);
            }
        }
        inner.live.insert(nonce.clone());
        inner.order.push_back(nonce.clone());
        nonce
    }

    /// Consume a nonce; `true` iff it was outstanding (not previously
    /// consumed, not evicted, not forged). A consumed nonce is removed
    /// immediately so it can never be accepted again (§3 "nonce
    /// monotonicity in single use").
    pub fn consume(&self, nonce: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.live.remove(nonce) {
            inner.order.retain(|n| n != nonce);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_nonce_is_consumed_exactly_once() {
        let store = NonceStore::new(16);
        let nonce = store.issue();
        assert!(store.consume(&nonce));
        assert!(!store.consume(&nonce));
    }

    #[test]
    fn issued_nonce_is_32_lowercase_hex_chars() {
        let store = NonceStore::new(16);
        let nonce = store.issue();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn unknown_nonce_is_rejected() {
        let store = NonceStore::new(16);
        assert!(!store.consume("not-a-real-nonce"));
    }

    #[test]
    fn eviction_invalidates_the_oldest_nonce() {
        let store = NonceStore::new(2);
        let first = store.issue();
        let _second = store.issue();
        let _third = store.issue(); // evicts `first`
        assert!(!store.consume(&first));
    }
}
