//! Error types for the gossip engine.
//!
//! `NodeError` is fatal and only comes out of `Node::start`. Everything that
//! happens while gossiping is an `Anomaly`: collected per unit of work (one
//! datagram, one broadcast pass, one close) and handed back as `Anomalies`.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tinydht_core::command::Command;
use tinydht_core::wire::WireError;

/// Startup failures.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send HELLO to {to}: {source}")]
    Send {
        to: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Something non-fatal that went wrong during one unit of work.
#[derive(Debug, thiserror::Error)]
pub enum Anomaly {
    #[error("HELLO received from known peer {0}")]
    DuplicateHello(SocketAddr),

    #[error("GOODBYE received from unknown peer {0}")]
    UnknownGoodbye(SocketAddr),

    #[error("{command} received from unknown peer {from}, adding this peer")]
    UnknownSender { from: SocketAddr, command: Command },

    #[error("PEERS from {from} lists unusable address {address:?}: {reason}")]
    BadPeerAddress {
        from: SocketAddr,
        address: String,
        reason: String,
    },

    #[error("datagram from {from}: {source}")]
    Wire {
        from: SocketAddr,
        #[source]
        source: WireError,
    },

    #[error("error while sending {command} to {to}: {source}")]
    Send {
        to: SocketAddr,
        command: Command,
        #[source]
        source: std::io::Error,
    },

    #[error("sending {command} to {to} timed out after {timeout:?}")]
    SendTimeout {
        to: SocketAddr,
        command: Command,
        timeout: Duration,
    },

    #[error("node is closed")]
    Closed,
}

/// Every anomaly from one unit of work, joined.
#[derive(Debug, Default)]
pub struct Anomalies(Vec<Anomaly>);

impl Anomalies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, anomaly: Anomaly) {
        self.0.push(anomaly);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Anomaly> {
        self.0.iter()
    }

    /// `Ok(ok)` if nothing was collected, otherwise the whole batch.
    pub fn into_result<T>(self, ok: T) -> Result<T, Anomalies> {
        if self.0.is_empty() {
            Ok(ok)
        } else {
            Err(self)
        }
    }
}

impl From<Anomaly> for Anomalies {
    fn from(anomaly: Anomaly) -> Self {
        Self(vec![anomaly])
    }
}

impl Extend<Anomaly> for Anomalies {
    fn extend<I: IntoIterator<Item = Anomaly>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Anomalies {
    type Item = Anomaly;
    type IntoIter = std::vec::IntoIter<Anomaly>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Anomalies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, anomaly) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{anomaly}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Anomalies {}
