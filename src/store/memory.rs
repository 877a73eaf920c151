//! The in-memory repository: two maps behind one read/write lock.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::{
    model::{Metric, MetricError, MetricKind},
    prelude::*,
};
use super::Repository;


#[derive(Default)]
struct Maps {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

/// Repository backend keeping everything in process memory. Reads take the
/// shared lock, updates the exclusive one. Used by the server when no
/// database is configured and always by the agent.
#[derive(Default)]
pub(crate) struct MemoryRepo {
    maps: RwLock<Maps>,
}

impl MemoryRepo {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The lock can only be poisoned by a panicking writer, and writers do not
    /// call anything that can panic. Should it happen anyway, the maps hold
    /// plain scalars, so continuing with the previous state is fine.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Maps> {
        self.maps.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Maps> {
        self.maps.write().unwrap_or_else(|e| e.into_inner())
    }

    fn merge(maps: &mut Maps, metric: &Metric) -> Metric {
        match metric.kind {
            MetricKind::Gauge => {
                let value = metric.value.unwrap_or(0.0);
                maps.gauges.insert(metric.id.clone(), value);
                Metric::gauge(&metric.id, value)
            }
            MetricKind::Counter => {
                let sum = maps.counters.entry(metric.id.clone()).or_insert(0);
                *sum += metric.delta.unwrap_or(0);
                Metric::counter(&metric.id, *sum)
            }
        }
    }
}

#[async_trait::async_trait]
impl Repository for MemoryRepo {
    async fn update_metric(&self, metric: &Metric) -> Result<Metric, MetricError> {
        Ok(Self::merge(&mut self.write(), metric))
    }

    async fn update_metrics(&self, metrics: &[Metric]) -> Result<Vec<Metric>, MetricError> {
        // A loop of singles under a single exclusive lock. There is no
        // rollback: this backend has no durability guarantees to protect.
        let mut maps = self.write();
        Ok(metrics.iter().map(|m| Self::merge(&mut maps, m)).collect())
    }

    async fn get_metric(&self, kind: MetricKind, id: &str) -> Result<Metric, MetricError> {
        let maps = self.read();
        match kind {
            MetricKind::Gauge => maps.gauges.get(id)
                .map(|v| Metric::gauge(id, *v))
                .ok_or(MetricError::NotFound),
            MetricKind::Counter => maps.counters.get(id)
                .map(|d| Metric::counter(id, *d))
                .ok_or(MetricError::NotFound),
        }
    }

    async fn all_metrics(&self, kind: MetricKind) -> Result<Vec<Metric>, MetricError> {
        let maps = self.read();
        let out = match kind {
            MetricKind::Gauge => maps.gauges.iter()
                .map(|(id, v)| Metric::gauge(id, *v))
                .collect(),
            MetricKind::Counter => maps.counters.iter()
                .map(|(id, d)| Metric::counter(id, *d))
                .collect(),
        };
        Ok(out)
    }

    async fn set_metric(&self, metric: &Metric) -> Result<(), MetricError> {
        let mut maps = self.write();
        match metric.kind {
            MetricKind::Gauge => {
                maps.gauges.insert(metric.id.clone(), metric.value.unwrap_or(0.0));
            }
            MetricKind::Counter => {
                maps.counters.insert(metric.id.clone(), metric.delta.unwrap_or(0));
            }
        }
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn close(&self) {
        trace!("Closed in-memory repository");
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counter_accumulates() {
        let repo = MemoryRepo::new();
        for delta in [5, 7, -2] {
            repo.update_metric(&Metric::counter("PollCount", delta)).await.unwrap();
        }
        let stored = repo.get_metric(MetricKind::Counter, "PollCount").await.unwrap();
        assert_eq!(stored.delta, Some(10));
    }

    #[tokio::test]
    async fn gauge_last_write_wins() {
        let repo = MemoryRepo::new();
        for value in [1.5, 88.0, 2.25] {
            repo.update_metric(&Metric::gauge("Alloc", value)).await.unwrap();
        }
        let stored = repo.get_metric(MetricKind::Gauge, "Alloc").await.unwrap();
        assert_eq!(stored.value, Some(2.25));
    }

    #[tokio::test]
    async fn update_echoes_post_merge_state() {
        let repo = MemoryRepo::new();
        repo.update_metric(&Metric::counter("x", 3)).await.unwrap();
        let second = repo.update_metric(&Metric::counter("x", 3)).await.unwrap();
        assert_eq!(second.delta, Some(6));
    }

    #[tokio::test]
    async fn kinds_do_not_collide() {
        let repo = MemoryRepo::new();
        repo.update_metric(&Metric::gauge("foo", 1.0)).await.unwrap();
        repo.update_metric(&Metric::counter("foo", 2)).await.unwrap();

        let gauge = repo.get_metric(MetricKind::Gauge, "foo").await.unwrap();
        let counter = repo.get_metric(MetricKind::Counter, "foo").await.unwrap();
        assert_eq!(gauge.value, Some(1.0));
        assert_eq!(counter.delta, Some(2));
    }

    #[tokio::test]
    async fn missing_metric_is_not_found() {
        let repo = MemoryRepo::new();
        let err = repo.get_metric(MetricKind::Gauge, "nope").await.unwrap_err();
        assert!(matches!(err, MetricError::NotFound));
    }

    #[tokio::test]
    async fn batch_equals_singles() {
        let batch = [
            Metric::counter("a", 1),
            Metric::gauge("b", 2.0),
            Metric::counter("a", 4),
        ];

        let batched = MemoryRepo::new();
        batched.update_metrics(&batch).await.unwrap();

        let single = MemoryRepo::new();
        for m in &batch {
            single.update_metric(m).await.unwrap();
        }

        for repo in [&batched, &single] {
            assert_eq!(
                repo.get_metric(MetricKind::Counter, "a").await.unwrap().delta,
                Some(5),
            );
            assert_eq!(
                repo.get_metric(MetricKind::Gauge, "b").await.unwrap().value,
                Some(2.0),
            );
        }
    }

    #[tokio::test]
    async fn set_does_not_accumulate() {
        let repo = MemoryRepo::new();
        repo.update_metric(&Metric::counter("c", 10)).await.unwrap();
        repo.set_metric(&Metric::counter("c", 3)).await.unwrap();
        let stored = repo.get_metric(MetricKind::Counter, "c").await.unwrap();
        assert_eq!(stored.delta, Some(3));
    }

    #[tokio::test]
    async fn concurrent_counter_updates_sum_up() {
        use std::sync::Arc;

        let repo = Arc::new(MemoryRepo::new());
        let tasks = (0..16).map(|_| {
            let repo = Arc::clone(&repo);
            tokio::spawn(async move {
                for _ in 0..100 {
                    repo.update_metric(&Metric::counter("hits", 1)).await.unwrap();
                }
            })
        }).collect::<Vec<_>>();
        for t in tasks {
            t.await.unwrap();
        }

        let stored = repo.get_metric(MetricKind::Counter, "hits").await.unwrap();
        assert_eq!(stored.delta, Some(1600));
    }
}
