//! Payment-proof replay protection.
//!
//! A payment proof is identified by the first 128 bits of its hash. The
//! replay set remembers identifiers seen within a bounded TTL; concurrent
//! writers are fine because insertion is single-writer-per-key and
//! eviction is lazy (checked on lookup).

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// How long a seen payment-proof identifier is remembered.
pub const REPLAY_TTL: Duration = Duration::from_secs(5 * 60);

/// Computes the replay identifier for a payment proof: the first 16 bytes
/// (128 bits) of its SHA-256 hash, hex-encoded.
#[must_use]
pub fn proof_identifier(proof: &str) -> String {
    let digest = Sha256::digest(proof.as_bytes());
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Tracks payment-proof identifiers seen within [`REPLAY_TTL`].
#[derive(Default)]
pub struct ReplaySet {
    seen: DashMap<String, Instant>,
}

impl ReplaySet {
    /// Checks whether `identifier` was already seen within the TTL, without
    /// recording anything. Used before the facilitator has even been asked
    /// to verify the proof.
    #[must_use]
    pub fn is_replay(&self, identifier: &str) -> bool {
        self.seen
            .get(identifier)
            .is_some_and(|at| at.elapsed() <= REPLAY_TTL)
    }

    /// Records `identifier` as seen now. Called only after the facilitator
    /// has verified the proof — a failed verification never marks the
    /// proof as used, so a caller whose verification call transiently
    /// failed can still retry with the same proof.
    pub fn mark_seen(&self, identifier: &str) {
        self.seen.insert(identifier.to_owned(), Instant::now());
    }

    /// Atomically checks-then-inserts in one step, for callers (such as
    /// tests) that do not need to separate the two phases.
    #[must_use]
    pub fn check_and_insert(&self, identifier: &str) -> bool {
        if self.is_replay(identifier) {
            true
        } else {
            self.mark_seen(identifier);
            false
        }
    }

    /// Drops entries older than the TTL. Called opportunistically; not
    /// required for correctness since lookups re-check age.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.seen.retain(|_, at| now.duration_since(*at) <= REPLAY_TTL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_a_replay() {
        let set = ReplaySet::default();
        assert!(!set.check_and_insert("abc"));
    }

    #[test]
    fn second_sighting_within_ttl_is_a_replay() {
        let set = ReplaySet::default();
        assert!(!set.check_and_insert("abc"));
        assert!(set.check_and_insert("abc"));
    }

    #[test]
    fn identifier_is_stable_for_the_same_proof() {
        assert_eq!(proof_identifier("my-proof"), proof_identifier("my-proof"));
        assert_ne!(proof_identifier("my-proof"), proof_identifier("other-proof"));
    }

    #[test]
    fn identifier_is_32_hex_chars_128_bits() {
        assert_eq!(proof_identifier("x").len(), 32);
    }
}
