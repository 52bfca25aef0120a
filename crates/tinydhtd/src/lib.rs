//! tinydhtd: a gossip node sharing content-addressed, expiring values
//! over UDP.
//!
//! Library half of the daemon so tests can run real nodes in-process.

pub mod error;
pub mod export;
pub mod gossip;
pub mod node;

pub use error::{Anomalies, Anomaly, NodeError};
pub use gossip::broadcast::PassSummary;
pub use node::{GossipTasks, Node};
