//! Peer table: every node we gossip with.
//!
//! Peers are deduplicated by address. The table is keyed on the canonical
//! string form of the socket address (`SocketAddr::to_string`), which is also
//! the form carried in PEERS announcements.

use std::collections::{BTreeMap, HashSet};
use std::net::{AddrParseError, SocketAddr};
use std::time::{Duration, SystemTime};

use tinydht_core::wire::Key;

/// A remote node, as far as we know it.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Where datagrams for this peer go. Also its identity.
    pub address: SocketAddr,

    /// Keys the peer announced via KEYS. Only ever grows, so this is a hint
    /// about what the peer holds, not a guarantee.
    pub known_keys: HashSet<Key>,

    /// Last time any datagram arrived from this address.
    pub last_seen: SystemTime,
}

impl Peer {
    pub fn new(address: SocketAddr, now: SystemTime) -> Self {
        Self {
            address,
            known_keys: HashSet::new(),
            last_seen: now,
        }
    }

    /// Has the peer announced this key?
    pub fn knows(&self, key: &Key) -> bool {
        self.known_keys.contains(key)
    }

    /// Record announced keys. Returns how many were new.
    pub fn learn(&mut self, keys: impl IntoIterator<Item = Key>) -> usize {
        keys.into_iter()
            .filter(|k| self.known_keys.insert(*k))
            .count()
    }

    /// Unseen for strictly longer than `ttl`. A `last_seen` in the future
    /// (clock stepped back) never counts as stale.
    pub fn is_stale(&self, now: SystemTime, ttl: Duration) -> bool {
        now.duration_since(self.last_seen)
            .map(|since| since > ttl)
            .unwrap_or(false)
    }
}

/// Canonical table key for an address.
pub fn peer_id(address: &SocketAddr) -> String {
    address.to_string()
}

/// Result of merging a PEERS announcement.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Addresses that were not known before and are now.
    pub added: Vec<SocketAddr>,
    /// Entries that did not parse as a socket address.
    pub rejected: Vec<(String, AddrParseError)>,
}

/// All known peers.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: BTreeMap<String, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, address: &SocketAddr) -> bool {
        self.peers.contains_key(&peer_id(address))
    }

    pub fn get(&self, address: &SocketAddr) -> Option<&Peer> {
        self.peers.get(&peer_id(address))
    }

    pub fn get_mut(&mut self, address: &SocketAddr) -> Option<&mut Peer> {
        self.peers.get_mut(&peer_id(address))
    }

    /// Add a peer unless one already exists at this address.
    /// An existing entry is left untouched. Returns true if added.
    pub fn insert_new(&mut self, address: SocketAddr, now: SystemTime) -> bool {
        let id = peer_id(&address);
        if self.peers.contains_key(&id) {
            return false;
        }
        tracing::debug!(peer = %address, "peer added");
        self.peers.insert(id, Peer::new(address, now));
        true
    }

    pub fn remove(&mut self, address: &SocketAddr) -> Option<Peer> {
        let removed = self.peers.remove(&peer_id(address));
        if removed.is_some() {
            tracing::debug!(peer = %address, "peer removed");
        }
        removed
    }

    /// Refresh `last_seen`. Returns false if the address is unknown.
    pub fn touch(&mut self, address: &SocketAddr, now: SystemTime) -> bool {
        match self.get_mut(address) {
            Some(peer) => {
                peer.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Merge a PEERS announcement. Unknown addresses become fresh peers;
    /// known ones keep their entry, key set and `last_seen` as they are.
    pub fn merge(&mut self, addresses: &[String], now: SystemTime) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for raw in addresses {
            match raw.parse::<SocketAddr>() {
                Ok(address) => {
                    if self.insert_new(address, now) {
                        outcome.added.push(address);
                    }
                }
                Err(e) => outcome.rejected.push((raw.clone(), e)),
            }
        }
        outcome
    }

    /// Canonical addresses of every peer, in table order.
    pub fn addresses(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Peer)> {
        self.peers.iter()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
