//! Read-only view of the store for the JSON state export.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

use tinydht_core::wire::unix_secs;

use crate::Store;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    /// Address this node is bound to.
    pub local: String,
    /// Canonical peer addresses, ordered.
    pub peers: Vec<String>,
    /// Hex key → value.
    pub values: BTreeMap<String, SnapshotValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotValue {
    /// Payload as text. Invalid UTF-8 is replaced, not rejected.
    pub value: String,
    /// Expiry in RFC 3339, UTC.
    pub expires: String,
}

impl Snapshot {
    pub fn capture(store: &Store, local: SocketAddr) -> Self {
        let values = store
            .values
            .iter()
            .map(|(key, v)| {
                (
                    key.to_hex(),
                    SnapshotValue {
                        value: String::from_utf8_lossy(v.payload()).into_owned(),
                        expires: format_expiry(v.expires()),
                    },
                )
            })
            .collect();

        Self {
            local: local.to_string(),
            peers: store.peers.addresses(),
            values,
        }
    }
}

/// Expiries come off the wire and may lie outside chrono's range;
/// those fall back to raw Unix seconds.
fn format_expiry(t: SystemTime) -> String {
    let secs = unix_secs(t);
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| format!("@{secs}"))
}
