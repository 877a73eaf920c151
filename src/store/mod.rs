//! Metric storage: one interface, interchangeable backends.

use std::sync::Arc;

use crate::{
    model::{Metric, MetricError, MetricKind},
    prelude::*,
    server::ServerConfig,
};

pub(crate) mod memory;
pub(crate) mod postgres;
pub(crate) mod snapshot;

pub(crate) use self::{memory::MemoryRepo, snapshot::Snapshot};


/// The storage interface shared by all backends.
///
/// Backends only implement merge and persistence; validation of incoming
/// payloads happens one layer up in [`crate::usecase::MetricsUseCase`], so an
/// implementation may assume that the scalar matching the metric kind is
/// populated.
#[async_trait::async_trait]
pub(crate) trait Repository: Send + Sync {
    /// Merges `metric` by its kind rule (gauge replaces, counter adds) and
    /// returns the resulting stored metric, i.e. the post-merge state.
    async fn update_metric(&self, metric: &Metric) -> Result<Metric, MetricError>;

    /// Applies a batch of updates. Atomic across the batch where the backend
    /// supports transactions, best-effort per item otherwise.
    async fn update_metrics(&self, metrics: &[Metric]) -> Result<Vec<Metric>, MetricError>;

    async fn get_metric(&self, kind: MetricKind, id: &str) -> Result<Metric, MetricError>;

    async fn all_metrics(&self, kind: MetricKind) -> Result<Vec<Metric>, MetricError>;

    /// Stores the metric exactly as given, without merging. This is the
    /// restore path: loading a snapshot must not accumulate counters.
    async fn set_metric(&self, metric: &Metric) -> Result<(), MetricError>;

    async fn ping(&self) -> bool;

    /// Releases backend resources. Called once during shutdown.
    async fn close(&self);
}

/// Creates the repository configured for the server: Postgres when a DSN is
/// configured, the in-memory backend otherwise.
pub(crate) async fn create_repository(config: &ServerConfig) -> Result<Arc<dyn Repository>> {
    match &config.db.dsn {
        Some(dsn) => {
            let repo = postgres::PostgresRepo::connect(dsn, config.db.pool_size).await
                .context("failed to connect to the metrics database")?;
            info!("Using the Postgres metric repository");
            Ok(Arc::new(repo))
        }
        None => {
            info!("No database configured: using the in-memory metric repository");
            Ok(Arc::new(MemoryRepo::new()))
        }
    }
}
