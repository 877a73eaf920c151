//! Snapshotting the repository to a file and restoring it on boot.
//!
//! The snapshot is a single JSON array of metrics, indented for human
//! diffing, and is always fully rewritten: truncate, encode, sync. There is
//! no appending and no partial write.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::{
    model::{Metric, MetricKind},
    prelude::*,
};
use super::Repository;


/// Not a repository itself, but a collaborator: given a repository, it can
/// dump its full contents to disk and load them back.
pub(crate) struct Snapshot {
    path: PathBuf,
    /// Serializes write cycles. The periodic writer and the final shutdown
    /// write must never interleave on the same file.
    write_lock: Mutex<()>,
}

impl Snapshot {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Loads the snapshot file into `repo`, storing each metric exactly as
    /// recorded. Restoring must not run through the merging update path: a
    /// counter that appears twice in the file would otherwise be doubled.
    /// A missing file is fine and means "nothing to restore".
    pub(crate) async fn restore(&self, repo: &dyn Repository) -> Result<usize> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot file at '{}', starting empty", self.path.display());
                return Ok(0);
            }
            Err(e) => {
                return Err(e).context(format!(
                    "failed to read snapshot file '{}'",
                    self.path.display(),
                ));
            }
        };

        let metrics: Vec<Metric> = serde_json::from_slice(&raw)
            .context(format!("snapshot file '{}' is not valid JSON", self.path.display()))?;

        let count = metrics.len();
        for metric in &metrics {
            repo.set_metric(metric).await
                .with_context(|| format!("failed to restore metric '{}'", metric.id))?;
        }

        info!("Restored {count} metrics from '{}'", self.path.display());
        Ok(count)
    }

    /// Writes the full repository state to the snapshot file.
    pub(crate) async fn persist(&self, repo: &dyn Repository) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut metrics = repo.all_metrics(MetricKind::Gauge).await
            .map_err(|e| anyhow!("failed to read gauges for snapshot: {e}"))?;
        metrics.extend(
            repo.all_metrics(MetricKind::Counter).await
                .map_err(|e| anyhow!("failed to read counters for snapshot: {e}"))?,
        );

        let encoded = serde_json::to_vec_pretty(&metrics)
            .context("failed to encode snapshot")?;

        // `File::create` truncates an existing file.
        let mut file = tokio::fs::File::create(&self.path).await
            .context(format!("failed to open snapshot file '{}'", self.path.display()))?;
        file.write_all(&encoded).await.context("failed to write snapshot")?;
        file.sync_all().await.context("failed to sync snapshot")?;

        trace!("Wrote {} metrics to '{}'", metrics.len(), self.path.display());
        Ok(())
    }

    /// Ticker-driven writer task. Runs until the shutdown signal fires, then
    /// writes one final snapshot. An interval of zero disables the ticker;
    /// the final write still happens.
    pub(crate) async fn run(
        self: Arc<Self>,
        every: Duration,
        repo: Arc<dyn Repository>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        if every > Duration::ZERO {
            let mut ticker = tokio::time::interval(every);
            // The first tick of a tokio interval fires immediately, and an
            // immediate snapshot of a just-restored repository is pointless.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.persist(&*repo).await {
                            error!("Periodic snapshot failed: {e:#}");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        } else {
            let _ = shutdown.changed().await;
        }

        if let Err(e) = self.persist(&*repo).await {
            error!("Final snapshot on shutdown failed: {e:#}");
        } else {
            info!("Wrote final snapshot to '{}'", self.path.display());
        }
    }
}
