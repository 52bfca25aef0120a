//! The node: socket, store and shutdown signal behind one handle.
//!
//! Every operation that touches the store takes the single state lock for its
//! whole duration. A broadcast pass keeps it across its sends, each bounded by
//! the configured send timeout, so a pass never interleaves with a receive.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;

use tinydht_core::command::{Command, Message};
use tinydht_core::config::{GossipConfig, TinyDhtConfig};
use tinydht_core::wire::{Key, WireError};
use tinydht_store::{Snapshot, Store};

use crate::error::{Anomalies, Anomaly, NodeError};
use crate::gossip::broadcast::{self, apply_removals, plan_pass, PassSummary};
use crate::gossip::receive::{self, dispatch};

struct NodeState {
    store: Store,
    /// None once the node is closed.
    transport: Option<Arc<UdpSocket>>,
}

pub struct Node {
    state: Mutex<NodeState>,
    local_addr: SocketAddr,
    gossip: GossipConfig,
    closed: watch::Sender<bool>,
}

/// Handles for the two gossip tasks of a running node.
pub struct GossipTasks {
    pub receive: JoinHandle<()>,
    pub broadcast: JoinHandle<()>,
}

impl GossipTasks {
    /// Wait for both loops to exit. They do once the node is closed.
    pub async fn join(self) {
        if let Err(e) = self.receive.await {
            tracing::error!(error = %e, "receive task failed");
        }
        if let Err(e) = self.broadcast.await {
            tracing::error!(error = %e, "broadcast task failed");
        }
    }
}

impl Node {
    /// Bind the socket and greet the bootstrap node.
    ///
    /// The preferred port falls back to an OS-assigned one when taken. No
    /// HELLO goes out when there is no bootstrap or when the bootstrap is
    /// this node's own address; the node is then the rendezvous point.
    pub async fn start(config: &TinyDhtConfig) -> Result<Arc<Node>, NodeError> {
        let preferred = SocketAddr::new(config.network.bind_host, config.network.port);
        let std_socket = match bind_socket(preferred) {
            Ok(s) => s,
            Err(e) if preferred.port() != 0 => {
                tracing::warn!(addr = %preferred, error = %e, "port taken, falling back to an ephemeral port");
                let fallback = SocketAddr::new(preferred.ip(), 0);
                bind_socket(fallback).map_err(|source| NodeError::Bind {
                    addr: fallback,
                    source,
                })?
            }
            Err(source) => {
                return Err(NodeError::Bind {
                    addr: preferred,
                    source,
                })
            }
        };
        let socket = UdpSocket::from_std(std_socket).map_err(|source| NodeError::Bind {
            addr: preferred,
            source,
        })?;
        let local_addr = socket.local_addr().map_err(NodeError::LocalAddr)?;
        let socket = Arc::new(socket);

        tracing::info!(local = %local_addr, "node bound");

        let mut store = Store::new();
        match config.network.bootstrap {
            Some(bootstrap) if !is_own_address(local_addr, bootstrap) => {
                let deadline = config.gossip.send_timeout();
                let hello = Message::Hello.encode();
                match time::timeout(deadline, socket.send_to(&hello, bootstrap)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(source)) => {
                        return Err(NodeError::Send {
                            to: bootstrap,
                            source,
                        })
                    }
                    Err(_) => {
                        return Err(NodeError::Send {
                            to: bootstrap,
                            source: std::io::Error::new(
                                std::io::ErrorKind::TimedOut,
                                "HELLO send timed out",
                            ),
                        })
                    }
                }
                store.peers.insert_new(bootstrap, SystemTime::now());
                tracing::info!(bootstrap = %bootstrap, "sent HELLO to bootstrap node");
            }
            _ => tracing::info!("no bootstrap node, acting as rendezvous"),
        }

        let (closed, _) = watch::channel(false);
        Ok(Arc::new(Node {
            state: Mutex::new(NodeState {
                store,
                transport: Some(socket),
            }),
            local_addr,
            gossip: config.gossip.clone(),
            closed,
        }))
    }

    /// Spawn the receive and broadcast loops.
    pub fn spawn_loops(self: &Arc<Self>) -> GossipTasks {
        GossipTasks {
            receive: tokio::spawn(receive::receive_loop(self.clone())),
            broadcast: tokio::spawn(broadcast::broadcast_loop(
                self.clone(),
                self.gossip.broadcast_interval(),
            )),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn gossip(&self) -> &GossipConfig {
        &self.gossip
    }

    pub async fn transport(&self) -> Option<Arc<UdpSocket>> {
        self.state.lock().await.transport.clone()
    }

    /// Receiver that flips to `true` when the node closes.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// One receive transition, as if `datagram` had just been read from `from`.
    pub async fn handle_datagram(&self, from: SocketAddr, datagram: &[u8]) -> Result<(), Anomalies> {
        let mut state = self.state.lock().await;
        if state.transport.is_none() {
            return Err(Anomaly::Closed.into());
        }
        dispatch(&mut state.store, from, datagram, SystemTime::now())
    }

    /// One full broadcast pass: plan, send, then apply the removals.
    pub async fn broadcast(&self) -> Result<PassSummary, Anomalies> {
        let mut state = self.state.lock().await;
        let Some(socket) = state.transport.clone() else {
            return Err(Anomaly::Closed.into());
        };

        let plan = plan_pass(&state.store, SystemTime::now(), self.gossip.peer_ttl());
        let mut anomalies = Anomalies::new();
        let mut sent = 0;
        for out in &plan.outbound {
            match send_datagram(&socket, out.to, out.command, &out.datagram, self.gossip.send_timeout()).await {
                Ok(()) => sent += 1,
                Err(anomaly) => anomalies.push(anomaly),
            }
        }

        let peers = state.store.peers.len();
        let (evicted, pruned) = apply_removals(&mut state.store, &plan);
        tracing::debug!(peers, sent, evicted, pruned, "broadcast pass");

        anomalies.into_result(PassSummary {
            peers,
            sent,
            evicted,
            pruned,
        })
    }

    /// Insert a local value, expiring after the configured value TTL.
    pub async fn add_value(&self, payload: impl Into<Vec<u8>>) -> Result<Key, WireError> {
        let mut state = self.state.lock().await;
        let key = state
            .store
            .add_local(payload, SystemTime::now(), self.gossip.value_ttl())?;
        tracing::info!(key = hex::encode(&key.as_bytes()[..8]), "value added");
        Ok(key)
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.store.snapshot(self.local_addr)
    }

    pub async fn check_invariants(&self) -> Result<(), String> {
        self.state.lock().await.store.check_invariants()
    }

    /// Say GOODBYE to every peer, drop the socket and clear the tables.
    ///
    /// Best effort: failed sends are collected, not retried. Closing a
    /// closed node does nothing.
    pub async fn close(&self) -> Result<(), Anomalies> {
        let mut state = self.state.lock().await;
        let Some(socket) = state.transport.take() else {
            return Ok(());
        };

        let goodbye = Message::Goodbye.encode();
        let peers: Vec<SocketAddr> = state.store.peers.iter().map(|(_, p)| p.address).collect();
        let mut anomalies = Anomalies::new();
        for to in peers {
            if let Err(anomaly) =
                send_datagram(&socket, to, Command::Goodbye, &goodbye, self.gossip.send_timeout()).await
            {
                anomalies.push(anomaly);
            }
        }

        state.store.clear();
        drop(socket);
        self.closed.send_replace(true);
        tracing::info!(local = %self.local_addr, "node closed");

        anomalies.into_result(())
    }
}

/// Bind a non-blocking UDP socket without address reuse, so a taken port
/// fails loudly instead of being shared.
fn bind_socket(addr: SocketAddr) -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Whether `target` reaches the socket bound at `local`.
fn is_own_address(local: SocketAddr, target: SocketAddr) -> bool {
    if local.port() != target.port() {
        return false;
    }
    target.ip() == local.ip() || (local.ip().is_unspecified() && target.ip().is_loopback())
}

async fn send_datagram(
    socket: &UdpSocket,
    to: SocketAddr,
    command: Command,
    datagram: &[u8],
    timeout: Duration,
) -> Result<(), Anomaly> {
    match time::timeout(timeout, socket.send_to(datagram, to)).await {
        Ok(Ok(_)) => {
            tracing::trace!(peer = %to, %command, bytes = datagram.len(), "sent");
            Ok(())
        }
        Ok(Err(source)) => Err(Anomaly::Send {
            to,
            command,
            source,
        }),
        Err(_) => Err(Anomaly::SendTimeout {
            to,
            command,
            timeout,
        }),
    }
}
