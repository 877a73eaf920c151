//! The relational repository. Two tables, one per metric kind, with the merge
//! rule expressed in SQL.

use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use secrecy::{ExposeSecret, Secret};
use tokio_postgres::{GenericClient, NoTls};

use crate::{
    model::{Metric, MetricError, MetricKind},
    prelude::*,
};
use super::Repository;


/// Delays between attempts of a batch update that failed with an
/// integrity-constraint violation. Any other error is not retried.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

const SCHEMA: &str = "\
    create table if not exists gauge_metrics ( \
        metric_id text primary key, \
        metric_value double precision not null \
    ); \
    create table if not exists counter_metrics ( \
        metric_id text primary key, \
        metric_value bigint not null \
    );";


pub(crate) struct PostgresRepo {
    pool: Pool,
}

impl PostgresRepo {
    /// Connects to the database behind `dsn`, makes sure the schema exists and
    /// verifies the connection with a test query.
    pub(crate) async fn connect(dsn: &Secret<String>, pool_size: usize) -> Result<Self> {
        let pg_config = dsn.expose_secret().parse::<tokio_postgres::Config>()
            .context("invalid database DSN")?;

        let manager = Manager::from_config(pg_config, NoTls, ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = Pool::builder(manager)
            .max_size(pool_size)
            .build()
            .context("failed to build DB pool")?;

        let client = pool.get().await.context("failed to get DB connection")?;
        client.batch_execute(SCHEMA).await.context("failed to create metric tables")?;
        client.execute("select 1", &[]).await.context("failed to execute DB test query")?;
        debug!("Database pool created, schema ready");

        Ok(Self { pool })
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, MetricError> {
        self.pool.get().await
            .map_err(|e| MetricError::Internal(anyhow!("failed to get DB connection: {e}")))
    }

    /// Applies the whole batch inside one transaction: either every update
    /// commits or none does.
    async fn update_batch_once(&self, metrics: &[Metric]) -> Result<Vec<Metric>, BatchError> {
        let mut client = self.client().await.map_err(BatchError::Pool)?;
        let tx = client.transaction().await.map_err(BatchError::Db)?;

        let mut out = Vec::with_capacity(metrics.len());
        for metric in metrics {
            out.push(merge(&*tx, metric).await.map_err(BatchError::Db)?);
        }

        tx.commit().await.map_err(BatchError::Db)?;
        Ok(out)
    }
}

#[async_trait::async_trait]
impl Repository for PostgresRepo {
    async fn update_metric(&self, metric: &Metric) -> Result<Metric, MetricError> {
        let client = self.client().await?;
        merge(&**client, metric).await.map_err(internal)
    }

    async fn update_metrics(&self, metrics: &[Metric]) -> Result<Vec<Metric>, MetricError> {
        let mut delays = RETRY_DELAYS.iter();
        loop {
            match self.update_batch_once(metrics).await {
                Ok(out) => return Ok(out),
                Err(BatchError::Pool(e)) => return Err(e),
                Err(BatchError::Db(e)) => {
                    let delay = match delays.next() {
                        Some(delay) if is_integrity_violation(&e) => *delay,
                        _ => return Err(internal(e)),
                    };
                    warn!(
                        "Batch update hit integrity violation, retrying in {:?}: {e}",
                        delay,
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn get_metric(&self, kind: MetricKind, id: &str) -> Result<Metric, MetricError> {
        let client = self.client().await?;
        let query = match kind {
            MetricKind::Gauge => "select metric_value from gauge_metrics where metric_id = $1",
            MetricKind::Counter => "select metric_value from counter_metrics where metric_id = $1",
        };
        let row = client.query_opt(query, &[&id]).await
            .map_err(internal)?
            .ok_or(MetricError::NotFound)?;

        Ok(match kind {
            MetricKind::Gauge => Metric::gauge(id, row.get::<_, f64>(0)),
            MetricKind::Counter => Metric::counter(id, row.get::<_, i64>(0)),
        })
    }

    async fn all_metrics(&self, kind: MetricKind) -> Result<Vec<Metric>, MetricError> {
        let client = self.client().await?;
        let query = match kind {
            MetricKind::Gauge => "select metric_id, metric_value from gauge_metrics",
            MetricKind::Counter => "select metric_id, metric_value from counter_metrics",
        };
        let rows = client.query(query, &[]).await.map_err(internal)?;

        Ok(rows.into_iter().map(|row| {
            let id: String = row.get(0);
            match kind {
                MetricKind::Gauge => Metric::gauge(id, row.get::<_, f64>(1)),
                MetricKind::Counter => Metric::counter(id, row.get::<_, i64>(1)),
            }
        }).collect())
    }

    async fn set_metric(&self, metric: &Metric) -> Result<(), MetricError> {
        let client = self.client().await?;
        match metric.kind {
            MetricKind::Gauge => {
                client.execute(
                    "insert into gauge_metrics (metric_id, metric_value) values ($1, $2) \
                        on conflict (metric_id) do update set metric_value = excluded.metric_value",
                    &[&metric.id, &metric.value.unwrap_or(0.0)],
                ).await.map_err(internal)?;
            }
            MetricKind::Counter => {
                client.execute(
                    "insert into counter_metrics (metric_id, metric_value) values ($1, $2) \
                        on conflict (metric_id) do update set metric_value = excluded.metric_value",
                    &[&metric.id, &metric.delta.unwrap_or(0)],
                ).await.map_err(internal)?;
            }
        }
        Ok(())
    }

    async fn ping(&self) -> bool {
        match self.pool.get().await {
            Ok(client) => client.execute("select 1", &[]).await.is_ok(),
            Err(e) => {
                warn!("DB ping failed: {e}");
                false
            }
        }
    }

    async fn close(&self) {
        self.pool.close();
        debug!("Closed DB pool");
    }
}

enum BatchError {
    Pool(MetricError),
    Db(tokio_postgres::Error),
}

/// UPDATE first, INSERT when no row was there yet. The update of a counter
/// returns the new running sum via `returning`.
async fn merge<C: GenericClient>(db: &C, metric: &Metric) -> Result<Metric, tokio_postgres::Error> {
    match metric.kind {
        MetricKind::Gauge => {
            let value = metric.value.unwrap_or(0.0);
            let updated = db.execute(
                "update gauge_metrics set metric_value = $2 where metric_id = $1",
                &[&metric.id, &value],
            ).await?;
            if updated == 0 {
                db.execute(
                    "insert into gauge_metrics (metric_id, metric_value) values ($1, $2)",
                    &[&metric.id, &value],
                ).await?;
            }
            Ok(Metric::gauge(&metric.id, value))
        }
        MetricKind::Counter => {
            let delta = metric.delta.unwrap_or(0);
            let row = db.query_opt(
                "update counter_metrics set metric_value = metric_value + $2 \
                    where metric_id = $1 returning metric_value",
                &[&metric.id, &delta],
            ).await?;
            let sum = match row {
                Some(row) => row.get::<_, i64>(0),
                None => {
                    db.execute(
                        "insert into counter_metrics (metric_id, metric_value) values ($1, $2)",
                        &[&metric.id, &delta],
                    ).await?;
                    delta
                }
            };
            Ok(Metric::counter(&metric.id, sum))
        }
    }
}

fn is_integrity_violation(err: &tokio_postgres::Error) -> bool {
    // SQLSTATE class 23 covers all integrity-constraint violations.
    err.code().is_some_and(|state| state.code().starts_with("23"))
}

fn internal(err: tokio_postgres::Error) -> MetricError {
    MetricError::Internal(err.into())
}
