//! tinydht integration test harness.
//!
//! Tests here run real nodes in-process, talking over loopback UDP. Every
//! node binds an OS-assigned port, so tests can run in parallel.
//!
//!   cargo test --test integration

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tinydht_core::command::Message;
use tinydht_core::config::TinyDhtConfig;
use tinydhtd::{GossipTasks, Node};
use tokio::net::UdpSocket;

mod convergence;
mod lifecycle;
mod wire;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Broadcast interval for test nodes. Short so scenarios settle quickly.
pub const FAST_INTERVAL_MS: u64 = 50;

/// Upper bound for any scenario to settle.
pub const SETTLE: Duration = Duration::from_secs(5);

/// Loopback config with no export, no stdin and a fast broadcast.
pub fn test_config(bootstrap: Option<SocketAddr>) -> TinyDhtConfig {
    let mut config = TinyDhtConfig::default();
    config.network.bind_host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.network.port = 0;
    config.network.bootstrap = bootstrap;
    config.gossip.broadcast_interval_ms = FAST_INTERVAL_MS;
    config.debug.export_path = None;
    config.debug.interactive = false;
    config
}

/// A started node with its gossip loops running.
pub struct Running {
    pub node: Arc<Node>,
    pub tasks: GossipTasks,
}

impl Running {
    pub async fn start(config: TinyDhtConfig) -> Result<Self> {
        let node = Node::start(&config).await.context("node failed to start")?;
        let tasks = node.spawn_loops();
        Ok(Self { node, tasks })
    }

    pub fn addr(&self) -> SocketAddr {
        self.node.local_addr()
    }

    pub async fn knows_peer(&self, peer: SocketAddr) -> bool {
        self.node.snapshot().await.peers.contains(&peer.to_string())
    }

    /// Close the node and wait for its loops to exit.
    pub async fn stop(self) -> Result<()> {
        if let Err(anomalies) = self.node.close().await {
            bail!("close reported: {anomalies}");
        }
        tokio::time::timeout(SETTLE, self.tasks.join())
            .await
            .context("gossip loops did not exit after close")?;
        Ok(())
    }
}

/// Poll `check` until it holds or `SETTLE` runs out.
pub async fn wait_until<F, Fut>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + SETTLE;
    loop {
        if check().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Raw peers ─────────────────────────────────────────────────────────────────

/// A bare loopback socket that stands in for a remote peer.
pub async fn raw_peer() -> Result<UdpSocket> {
    Ok(UdpSocket::bind("127.0.0.1:0").await?)
}

/// Collect whatever the node sends to `socket` during `window`.
pub async fn drain(socket: &UdpSocket, window: Duration) -> Vec<Message> {
    let mut buf = vec![0u8; 65_535];
    let mut out = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok((len, _))) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
        if let Ok(msg) = Message::decode(&buf[..len]) {
            out.push(msg);
        }
    }
    out
}
