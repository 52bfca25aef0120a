//! Receive loop: one inbound datagram is one state transition.
//!
//! `dispatch` is the transition itself: synchronous, run by the node while it
//! holds the store lock. `receive_loop` is the task that waits on the socket
//! and feeds datagrams in.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::time;

use tinydht_core::command::{decode_keys, decode_peers, split_frame, Command};
use tinydht_core::wire::{Value, RECV_BUFFER_LEN};
use tinydht_store::Store;

use crate::error::{Anomalies, Anomaly};
use crate::node::Node;

/// Apply one datagram from `from` to the store.
///
/// Never stops early: every anomaly met along the way is collected and
/// returned together. Whatever the command did, a sender that is known
/// afterwards gets its `last_seen` refreshed.
pub fn dispatch(
    store: &mut Store,
    from: SocketAddr,
    datagram: &[u8],
    now: SystemTime,
) -> Result<(), Anomalies> {
    let mut anomalies = Anomalies::new();

    match split_frame(datagram) {
        Ok((command, payload)) => apply(store, from, command, payload, now, &mut anomalies),
        Err(source) => anomalies.push(Anomaly::Wire { from, source }),
    }

    store.peers.touch(&from, now);
    anomalies.into_result(())
}

fn apply(
    store: &mut Store,
    from: SocketAddr,
    command: Command,
    payload: &[u8],
    now: SystemTime,
    anomalies: &mut Anomalies,
) {
    match command {
        Command::Hello => {
            if store.peers.insert_new(from, now) {
                tracing::info!(peer = %from, "new peer said HELLO");
            } else {
                anomalies.push(Anomaly::DuplicateHello(from));
            }
        }

        Command::Goodbye => {
            if store.peers.remove(&from).is_some() {
                tracing::info!(peer = %from, "peer said GOODBYE");
            } else {
                anomalies.push(Anomaly::UnknownGoodbye(from));
            }
        }

        Command::Peers => {
            discover(store, from, command, now, anomalies);
            match decode_peers(payload) {
                Ok(addresses) => {
                    let outcome = store.peers.merge(&addresses, now);
                    if !outcome.added.is_empty() {
                        tracing::debug!(peer = %from, added = outcome.added.len(), "merged PEERS");
                    }
                    anomalies.extend(outcome.rejected.into_iter().map(|(address, e)| {
                        Anomaly::BadPeerAddress {
                            from,
                            address,
                            reason: e.to_string(),
                        }
                    }));
                }
                Err(source) => anomalies.push(Anomaly::Wire { from, source }),
            }
        }

        Command::Keys => {
            discover(store, from, command, now, anomalies);
            match decode_keys(payload) {
                Ok(keys) => {
                    if let Some(peer) = store.peers.get_mut(&from) {
                        let learned = peer.learn(keys);
                        tracing::trace!(peer = %from, learned, "merged KEYS");
                    }
                }
                Err(source) => anomalies.push(Anomaly::Wire { from, source }),
            }
        }

        Command::Value => {
            discover(store, from, command, now, anomalies);
            match Value::decode(payload) {
                Ok(value) => {
                    tracing::debug!(
                        peer = %from,
                        key = hex::encode(&value.hash().as_bytes()[..8]),
                        bytes = value.payload().len(),
                        "value stored"
                    );
                    store.values.insert(value);
                }
                Err(source) => anomalies.push(Anomaly::Wire { from, source }),
            }
        }
    }
}

/// First contact through anything but HELLO still makes the sender a peer.
fn discover(
    store: &mut Store,
    from: SocketAddr,
    command: Command,
    now: SystemTime,
    anomalies: &mut Anomalies,
) {
    if store.peers.insert_new(from, now) {
        anomalies.push(Anomaly::UnknownSender { from, command });
    }
}

/// Pause after a failed `recv_from` so a persistent socket error does not spin.
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Sleep out the backoff. Returns true if the node closed meanwhile.
async fn back_off(closed: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = closed.changed() => true,
        _ = time::sleep(RECV_ERROR_BACKOFF) => *closed.borrow(),
    }
}

/// Read datagrams until the node closes.
///
/// A failed `recv_from` only ends that iteration; the next read follows
/// after `RECV_ERROR_BACKOFF`.
pub async fn receive_loop(node: Arc<Node>) {
    let Some(socket) = node.transport().await else {
        return;
    };
    let mut closed = node.closed();
    let mut buf = vec![0u8; RECV_BUFFER_LEN];

    tracing::info!(local = %node.local_addr(), "receive loop starting");

    loop {
        if *closed.borrow() {
            break;
        }

        tokio::select! {
            _ = closed.changed() => break,

            result = socket.recv_from(&mut buf) => {
                let (len, from) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                        if back_off(&mut closed).await {
                            break;
                        }
                        continue;
                    }
                };

                tracing::trace!(peer = %from, bytes = len, "datagram received");

                if let Err(anomalies) = node.handle_datagram(from, &buf[..len]).await {
                    for anomaly in anomalies.iter() {
                        tracing::warn!(peer = %from, "while receiving: {anomaly}");
                    }
                }
            }
        }
    }

    tracing::info!("receive loop shutting down");
}
