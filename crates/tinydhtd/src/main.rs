//! tinydhtd: gossip DHT daemon.
//!
//! Usage: `tinydhtd [BOOTSTRAP_ADDR]`. Lines typed on stdin are inserted as
//! values; `exit`, end of input or Ctrl-C shuts the node down.

use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use tinydht_core::config::TinyDhtConfig;
use tinydhtd::export;
use tinydhtd::Node;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = TinyDhtConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = TinyDhtConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TinyDhtConfig::default()
    });

    if let Some(arg) = std::env::args().nth(1) {
        let bootstrap: SocketAddr = arg
            .parse()
            .with_context(|| format!("invalid bootstrap address {arg:?}"))?;
        config.network.bootstrap = Some(bootstrap);
    }

    let node = Node::start(&config).await.context("failed to start node")?;
    tracing::info!(local = %node.local_addr(), "tinydhtd running");

    let gossip = node.spawn_loops();

    let export_task = config.debug.export_path.clone().map(|path| {
        let every = Duration::from_secs(config.debug.export_interval_secs.max(1));
        tokio::spawn(export::export_loop(node.clone(), path, every))
    });

    // ── Input ────────────────────────────────────────────────────────────────

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    // Held while not interactive so the channel never reports end of input.
    let _idle_tx = if config.debug.interactive {
        spawn_stdin_reader(line_tx);
        None
    } else {
        Some(line_tx)
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("shutdown signal received");
                break;
            }
            line = line_rx.recv() => match line {
                None => {
                    tracing::info!("end of input");
                    break;
                }
                Some(line) if line.trim() == "exit" => break,
                Some(line) if line.is_empty() => continue,
                Some(line) => match node.add_value(line).await {
                    Ok(key) => println!("{key}"),
                    Err(e) => tracing::warn!(error = %e, "value rejected"),
                },
            },
        }
    }

    if let Err(anomalies) = node.close().await {
        for anomaly in anomalies.iter() {
            tracing::warn!("while closing: {anomaly}");
        }
    }
    gossip.join().await;
    if let Some(task) = export_task {
        task.await.ok();
    }

    tracing::info!("tinydhtd stopped");
    Ok(())
}

/// Blocking stdin reads stay on their own thread so shutdown never waits on
/// them.
fn spawn_stdin_reader(tx: mpsc::UnboundedSender<String>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut line = String::new();
        loop {
            print!("Type something to add it to the DHT: ");
            std::io::stdout().flush().ok();

            line.clear();
            match input.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let text = line.trim_end_matches(['\r', '\n']).to_string();
                    if tx.send(text).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read stdin");
                    break;
                }
            }
        }
    });
}
