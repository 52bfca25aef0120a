use crate::*;

use tinydht_core::wire::content_hash;

/// A inserts "hello"; B ends up holding exactly that value under its hash.
#[tokio::test]
async fn test_value_reaches_bootstrap_node() -> Result<()> {
    let b = Running::start(test_config(None)).await?;
    let a = Running::start(test_config(Some(b.addr()))).await?;

    let key = a.node.add_value("hello").await?;
    assert_eq!(key, content_hash(b"hello"));

    let b_ref = &b;
    wait_until("B to hold the value", || async move {
        !b_ref.node.snapshot().await.values.is_empty()
    })
    .await?;

    let snapshot = b.node.snapshot().await;
    assert_eq!(snapshot.values.len(), 1);
    assert_eq!(snapshot.values[&key.to_hex()].value, "hello");

    a.stop().await?;
    b.stop().await?;
    Ok(())
}

/// Values inserted on the edges of a star reach every node, and nodes that
/// only share a bootstrap find each other through PEERS.
#[tokio::test]
async fn test_three_nodes_converge() -> Result<()> {
    let hub = Running::start(test_config(None)).await?;
    let left = Running::start(test_config(Some(hub.addr()))).await?;
    let right = Running::start(test_config(Some(hub.addr()))).await?;

    let k1 = left.node.add_value("from the left").await?;
    let k2 = right.node.add_value("from the right").await?;
    let k3 = hub.node.add_value("from the hub").await?;
    let expected = [k1.to_hex(), k2.to_hex(), k3.to_hex()];

    for (name, node) in [("hub", &hub), ("left", &left), ("right", &right)] {
        let expected = &expected;
        wait_until(&format!("{name} to hold all values"), || async move {
            let snapshot = node.node.snapshot().await;
            expected.iter().all(|k| snapshot.values.contains_key(k))
        })
        .await?;
    }

    let (left_ref, right_addr) = (&left, right.addr());
    wait_until("left to discover right", || async move {
        left_ref.knows_peer(right_addr).await
    })
    .await?;

    for node in [&hub.node, &left.node, &right.node] {
        node.check_invariants().await.map_err(anyhow::Error::msg)?;
    }

    left.stop().await?;
    right.stop().await?;
    hub.stop().await?;
    Ok(())
}

/// Gossip settles: once both sides announced their keys, no VALUE is resent.
#[tokio::test]
async fn test_values_are_not_duplicated() -> Result<()> {
    let b = Running::start(test_config(None)).await?;
    let a = Running::start(test_config(Some(b.addr()))).await?;

    for i in 0..20 {
        a.node.add_value(format!("value {i}")).await?;
    }

    let b_ref = &b;
    wait_until("B to hold all values", || async move {
        b_ref.node.snapshot().await.values.len() == 20
    })
    .await?;

    // Give a few more passes a chance to run; the table must not grow.
    tokio::time::sleep(Duration::from_millis(FAST_INTERVAL_MS * 4)).await;
    assert_eq!(b.node.snapshot().await.values.len(), 20);
    assert_eq!(a.node.snapshot().await.values.len(), 20);

    a.stop().await?;
    b.stop().await?;
    Ok(())
}
