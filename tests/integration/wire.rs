//! A raw UDP socket plays the remote peer, so every datagram the node sends
//! can be inspected.

use crate::*;

use std::time::SystemTime;

use tinydht_core::command::Message;
use tinydht_core::wire::{content_hash, Value};

/// After HELLO, the next pass sends the newcomer KEYS and PEERS.
#[tokio::test]
async fn test_hello_is_answered_by_next_pass() -> Result<()> {
    let node = Running::start(test_config(None)).await?;
    let peer = raw_peer().await?;
    peer.send_to(&Message::Hello.encode(), node.addr()).await?;

    let got = drain(&peer, Duration::from_millis(FAST_INTERVAL_MS * 4)).await;
    assert!(got.contains(&Message::Keys(vec![])), "no KEYS in {got:?}");
    assert!(
        got.iter().any(|m| matches!(m, Message::Peers(p) if p.contains(&peer.local_addr().unwrap().to_string()))),
        "no PEERS listing the newcomer in {got:?}"
    );

    node.stop().await?;
    Ok(())
}

/// A peer that announced a key is never sent that value.
#[tokio::test]
async fn test_announced_keys_suppress_values() -> Result<()> {
    let node = Running::start(test_config(None)).await?;
    let held = node.node.add_value("already have it").await?;
    let missing = node.node.add_value("send me this").await?;

    let peer = raw_peer().await?;
    peer.send_to(&Message::Keys(vec![held]).encode(), node.addr()).await?;

    let got = drain(&peer, Duration::from_millis(FAST_INTERVAL_MS * 5)).await;
    let values: Vec<_> = got
        .iter()
        .filter_map(|m| match m {
            Message::Value(v) => Some(*v.hash()),
            _ => None,
        })
        .collect();
    assert!(values.contains(&missing));
    assert!(!values.contains(&held));

    node.stop().await?;
    Ok(())
}

/// A record whose payload does not match its hash is dropped; the node keeps
/// serving.
#[tokio::test]
async fn test_tampered_value_is_rejected() -> Result<()> {
    let node = Running::start(test_config(None)).await?;
    let peer = raw_peer().await?;
    let expires = SystemTime::now() + Duration::from_secs(3600);

    let mut tampered = Message::Value(Value::new(b"honest".to_vec(), expires)?).encode();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    peer.send_to(&tampered, node.addr()).await?;
    peer.send_to(&[0x7f, 1, 2, 3], node.addr()).await?;

    let good = Value::new(b"honest".to_vec(), expires)?;
    peer.send_to(&Message::Value(good).encode(), node.addr()).await?;

    let n = &node;
    wait_until("the good value", || async move {
        !n.node.snapshot().await.values.is_empty()
    })
    .await?;
    let snapshot = node.node.snapshot().await;
    assert_eq!(snapshot.values.len(), 1);
    assert!(snapshot.values.contains_key(&content_hash(b"honest").to_hex()));

    node.stop().await?;
    Ok(())
}

/// Expired values are neither stored for long nor passed on.
#[tokio::test]
async fn test_expired_value_is_not_gossiped() -> Result<()> {
    let node = Running::start(test_config(None)).await?;
    let peer = raw_peer().await?;

    let stale = Value::new(b"old news".to_vec(), SystemTime::now() - Duration::from_secs(10))?;
    peer.send_to(&Message::Value(stale).encode(), node.addr()).await?;

    let got = drain(&peer, Duration::from_millis(FAST_INTERVAL_MS * 4)).await;
    assert!(!got.iter().any(|m| matches!(m, Message::Value(_))));
    // Once evicted, the key is no longer announced either.
    let last_keys = got.iter().rev().find(|m| matches!(m, Message::Keys(_)));
    assert_eq!(last_keys, Some(&Message::Keys(vec![])));
    assert!(node.node.snapshot().await.values.is_empty());

    node.stop().await?;
    Ok(())
}
