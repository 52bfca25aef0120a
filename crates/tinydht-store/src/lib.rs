//! tinydht-store: the in-memory state a node gossips.
//!
//! `Store` owns the peer table and the value table. It does no locking of
//! its own: the node wraps the whole store in one exclusive lock, so every
//! receive step and every broadcast pass sees and leaves a consistent pair.

pub mod peer;
pub mod snapshot;
pub mod value;

use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use tinydht_core::wire::{content_hash, unix_secs, Key, Value, WireError};

pub use peer::{peer_id, MergeOutcome, Peer, PeerTable};
pub use snapshot::{Snapshot, SnapshotValue};
pub use value::ValueTable;

#[derive(Debug, Default)]
pub struct Store {
    pub peers: PeerTable,
    pub values: ValueTable,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a locally produced payload, expiring `ttl` after `now`.
    ///
    /// A TTL that takes the expiry past what the clock can represent is
    /// rejected, not saturated.
    pub fn add_local(
        &mut self,
        payload: impl Into<Vec<u8>>,
        now: SystemTime,
        ttl: Duration,
    ) -> Result<Key, WireError> {
        let expires = now.checked_add(ttl).ok_or_else(|| {
            let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
            WireError::ExpiryOutOfRange(unix_secs(now).saturating_add(ttl_secs))
        })?;
        let value = Value::new(payload, expires)?;
        let key = *value.hash();
        self.values.insert(value);
        Ok(key)
    }

    pub fn snapshot(&self, local: SocketAddr) -> Snapshot {
        Snapshot::capture(self, local)
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.values.clear();
    }

    /// Verify the table invariants: every value sits under its own content
    /// hash, and every peer under its canonical address.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (key, value) in self.values.iter() {
            if key != value.hash() {
                return Err(format!("value {key:?} stored under foreign key {:?}", value.hash()));
            }
            if content_hash(value.payload()) != *key {
                return Err(format!("value {key:?} does not hash to its key"));
            }
        }
        for (id, peer) in self.peers.iter() {
            if *id != peer_id(&peer.address) {
                return Err(format!("peer {} stored under {id}", peer.address));
            }
        }
        Ok(())
    }
}
