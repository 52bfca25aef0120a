//! Periodic JSON dump of the node state, for watching a mesh converge.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{self, MissedTickBehavior};

use crate::node::Node;

/// Write the current snapshot to `path` as pretty JSON.
///
/// Writes are atomic: temp file, then rename over the target.
pub async fn export_once(node: &Node, path: &Path) -> Result<()> {
    let snapshot = node.snapshot().await;
    let json = serde_json::to_vec_pretty(&snapshot).context("failed to serialize snapshot")?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, &json)
        .await
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path).await.with_context(|| {
        format!(
            "failed to rename {} to {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

/// Export every `every` until the node closes. Failures are logged and the
/// next tick tries again.
pub async fn export_loop(node: Arc<Node>, path: PathBuf, every: Duration) {
    let mut closed = node.closed();
    let mut interval = time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(path = %path.display(), "state export enabled");

    loop {
        if *closed.borrow() {
            break;
        }

        tokio::select! {
            _ = closed.changed() => break,
            _ = interval.tick() => {
                if let Err(e) = export_once(&node, &path).await {
                    tracing::warn!(error = %format!("{e:#}"), "state export failed");
                }
            }
        }
    }
}
