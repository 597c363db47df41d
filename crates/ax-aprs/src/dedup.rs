//! Time-windowed frame deduplication
//!
//! APRS digipeating hands every station the same frame several times within
//! a few seconds. The cache stores a 64-bit hash of (source, destination,
//! payload) with an expiry; a hash seen again inside the window is a
//! duplicate. Expired entries are pruned on insertion, so lookups never see
//! a stale hit.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use tokio::time::Instant;

use ax_protocol::frame::Ax25Frame;

/// Hash the identifying parts of a frame for deduplication
pub fn frame_hash(frame: &Ax25Frame) -> u64 {
    let mut hasher = DefaultHasher::new();
    frame.path.source.hash(&mut hasher);
    frame.path.destination.hash(&mut hasher);
    frame.payload.hash(&mut hasher);
    hasher.finish()
}

/// Expiring set of recently seen frame hashes
#[derive(Debug)]
pub struct DedupCache {
    entries: HashMap<u64, Instant>,
    expiry: Duration,
}

impl DedupCache {
    pub fn new(expiry: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            expiry,
        }
    }

    /// Test whether `hash` was seen inside the window; fresh hashes are
    /// inserted. Duplicates do not refresh the window. Returns true for
    /// duplicates.
    pub fn check_and_insert(&mut self, hash: u64) -> bool {
        let now = Instant::now();
        self.prune(now);
        if self.entries.get(&hash).is_some_and(|&expires| expires > now) {
            return true;
        }
        self.entries.insert(hash, now + self.expiry);
        false
    }

    fn prune(&mut self, now: Instant) {
        self.entries.retain(|_, &mut expires| expires > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
