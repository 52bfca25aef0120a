//! Broadcast loop: periodic full-state push to every known peer.
//!
//! A pass is planned as data first (`plan_pass`), then sent, then its
//! deferred removals are applied (`apply_removals`). The node runs all three
//! under one hold of the store lock, so a pass is atomic with respect to
//! receives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::time::{self, MissedTickBehavior};

use tinydht_core::command::{frame, keys_messages, peers_messages, Command};
use tinydht_core::wire::Key;
use tinydht_store::Store;

use crate::node::Node;

/// One datagram to send.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: SocketAddr,
    pub command: Command,
    pub datagram: Bytes,
}

/// Everything one pass does.
#[derive(Debug, Default)]
pub struct PassPlan {
    pub outbound: Vec<Outbound>,
    /// Values past their deadline. Never sent, removed after the pass.
    pub expired: Vec<Key>,
    /// Peers unseen for longer than the TTL. Removed after the pass.
    pub stale: Vec<SocketAddr>,
}

impl PassPlan {
    /// Datagrams addressed to one peer, in send order.
    pub fn to_peer(&self, peer: SocketAddr) -> impl Iterator<Item = &Outbound> {
        self.outbound.iter().filter(move |o| o.to == peer)
    }
}

/// Counters for one completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub peers: usize,
    pub sent: usize,
    pub evicted: usize,
    pub pruned: usize,
}

/// Plan a pass over `store` as of `now`.
///
/// For every peer: KEYS with every key in the table, PEERS with every known
/// address (the recipient included), then each live value whose key the
/// peer has not announced. Each list and record is encoded once and shared.
///
/// The lists describe the table as it stands when the pass starts; values
/// and peers marked here for removal are still listed.
pub fn plan_pass(store: &Store, now: SystemTime, peer_ttl: Duration) -> PassPlan {
    let expired = store.values.expired_keys(now);
    let keys: Vec<Bytes> = keys_messages(&store.values.keys())
        .iter()
        .map(|m| Bytes::from(m.encode()))
        .collect();
    let peers: Vec<Bytes> = peers_messages(&store.peers.addresses())
        .iter()
        .map(|m| Bytes::from(m.encode()))
        .collect();
    let values: Vec<(Key, Bytes)> = store
        .values
        .iter()
        .filter(|(_, v)| !v.is_expired(now))
        .map(|(key, v)| (*key, Bytes::from(frame(Command::Value, &v.encode()))))
        .collect();

    let mut plan = PassPlan {
        expired,
        ..PassPlan::default()
    };

    for (_, peer) in store.peers.iter() {
        let to = peer.address;
        for datagram in &keys {
            plan.outbound.push(Outbound {
                to,
                command: Command::Keys,
                datagram: datagram.clone(),
            });
        }
        for datagram in &peers {
            plan.outbound.push(Outbound {
                to,
                command: Command::Peers,
                datagram: datagram.clone(),
            });
        }
        for (key, datagram) in &values {
            if !peer.knows(key) {
                plan.outbound.push(Outbound {
                    to,
                    command: Command::Value,
                    datagram: datagram.clone(),
                });
            }
        }
        if peer.is_stale(now, peer_ttl) {
            plan.stale.push(to);
        }
    }

    plan
}

/// Apply a plan's deferred removals. Returns (values evicted, peers pruned).
pub fn apply_removals(store: &mut Store, plan: &PassPlan) -> (usize, usize) {
    let evicted = plan
        .expired
        .iter()
        .filter(|key| store.values.remove(key).is_some())
        .count();
    let pruned = plan
        .stale
        .iter()
        .filter(|peer| store.peers.remove(peer).is_some())
        .count();

    if evicted > 0 || pruned > 0 {
        tracing::debug!(evicted, pruned, "applied deferred removals");
    }
    (evicted, pruned)
}

/// Run a pass every `every` until the node closes. The first pass runs
/// immediately.
pub async fn broadcast_loop(node: Arc<Node>, every: Duration) {
    let mut closed = node.closed();
    let mut interval = time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(interval_ms = every.as_millis() as u64, "broadcast loop starting");

    loop {
        if *closed.borrow() {
            break;
        }

        tokio::select! {
            _ = closed.changed() => break,

            _ = interval.tick() => {
                match node.broadcast().await {
                    Ok(summary) => tracing::trace!(?summary, "broadcast pass complete"),
                    Err(anomalies) => {
                        for anomaly in anomalies.iter() {
                            tracing::warn!("while broadcasting: {anomaly}");
                        }
                    }
                }
            }
        }
    }

    tracing::info!("broadcast loop shutting down");
}
