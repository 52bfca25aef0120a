use crate::*;

use tinydht_core::command::Message;

/// A node that starts with a bootstrap address is registered there by HELLO.
#[tokio::test]
async fn test_hello_registers_newcomer() -> Result<()> {
    let b = Running::start(test_config(None)).await?;
    let a = Running::start(test_config(Some(b.addr()))).await?;

    let (a_addr, b_ref) = (a.addr(), &b);
    wait_until("B to know A", || async move { b_ref.knows_peer(a_addr).await }).await?;
    assert!(a.knows_peer(b.addr()).await, "A should register its bootstrap");

    a.stop().await?;
    b.stop().await?;
    Ok(())
}

/// A node whose bootstrap is itself starts alone and says nothing.
#[tokio::test]
async fn test_self_bootstrap_is_rendezvous() -> Result<()> {
    let spare = std::net::UdpSocket::bind("127.0.0.1:0")?;
    let port = spare.local_addr()?.port();
    drop(spare);

    let mut config = test_config(Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)));
    config.network.port = port;
    let node = Node::start(&config).await?;

    // The port may have been grabbed in between; then the bootstrap is a
    // foreign address and gets registered.
    if node.local_addr().port() == port {
        assert!(node.snapshot().await.peers.is_empty());
    }
    node.close().await.ok();
    Ok(())
}

/// GOODBYE removes the sender at once, and later passes no longer target it.
#[tokio::test]
async fn test_goodbye_removes_peer() -> Result<()> {
    // B runs its first pass at startup, then only on demand.
    let mut b_config = test_config(None);
    b_config.gossip.broadcast_interval_ms = 3_600_000;
    let b = Running::start(b_config).await?;

    // A is a raw socket, so everything B sends it can be seen.
    let a = raw_peer().await?;
    let a_addr = a.local_addr()?;
    a.send_to(&Message::Hello.encode(), b.addr()).await?;

    let b_ref = &b;
    wait_until("B to know A", || async move { b_ref.knows_peer(a_addr).await }).await?;

    a.send_to(&Message::Goodbye.encode(), b.addr()).await?;
    wait_until("B to forget A", || async move { !b_ref.knows_peer(a_addr).await }).await?;
    drain(&a, Duration::from_millis(FAST_INTERVAL_MS)).await;

    let summary = b.node.broadcast().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(summary.peers, 0);
    assert_eq!(summary.sent, 0);

    let got = drain(&a, Duration::from_millis(FAST_INTERVAL_MS * 4)).await;
    assert!(got.is_empty(), "A was sent {got:?} after its GOODBYE");

    b.stop().await?;
    Ok(())
}

/// Closing clears both tables and is safe to repeat.
#[tokio::test]
async fn test_close_is_idempotent() -> Result<()> {
    let b = Running::start(test_config(None)).await?;
    let a = Running::start(test_config(Some(b.addr()))).await?;
    a.node.add_value("bye").await?;

    let node = a.node.clone();
    a.stop().await?;
    node.close().await.map_err(|e| anyhow::anyhow!("{e}"))?;

    let snapshot = node.snapshot().await;
    assert!(snapshot.peers.is_empty());
    assert!(snapshot.values.is_empty());
    assert!(node.is_closed());

    b.stop().await?;
    Ok(())
}
