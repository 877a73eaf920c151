//! The validation gate every transport goes through before touching storage.

use std::sync::Arc;

use crate::{
    model::{Metric, MetricError, MetricKind},
    store::Repository,
};


/// Validates incoming metric payloads and dispatches the valid ones to the
/// repository. This is the single contract shared by the HTTP handlers, the
/// gRPC service and the agent's collector: backends behind it never see a
/// metric whose scalar is missing.
///
/// It never retries and never transforms units.
#[derive(Clone)]
pub(crate) struct MetricsUseCase {
    repo: Arc<dyn Repository>,
}

impl MetricsUseCase {
    pub(crate) fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub(crate) async fn update_metric(&self, metric: &Metric) -> Result<Metric, MetricError> {
        validate(metric)?;
        self.repo.update_metric(metric).await
    }

    /// Validates the whole batch up front, short-circuiting on the first bad
    /// entry, then hands it to the repository in one piece.
    pub(crate) async fn update_metrics(
        &self,
        metrics: &[Metric],
    ) -> Result<Vec<Metric>, MetricError> {
        for metric in metrics {
            validate(metric)?;
        }
        self.repo.update_metrics(metrics).await
    }

    pub(crate) async fn get_metric(
        &self,
        kind: MetricKind,
        id: &str,
    ) -> Result<Metric, MetricError> {
        self.repo.get_metric(kind, id).await
    }

    pub(crate) async fn all_metrics(&self, kind: MetricKind) -> Result<Vec<Metric>, MetricError> {
        self.repo.all_metrics(kind).await
    }

    pub(crate) async fn ping(&self) -> bool {
        self.repo.ping().await
    }
}

fn validate(metric: &Metric) -> Result<(), MetricError> {
    if metric.id.is_empty() {
        return Err(MetricError::NilValue);
    }

    match metric.kind {
        MetricKind::Gauge if metric.value.is_none() => Err(MetricError::NilValue),
        MetricKind::Counter if metric.delta.is_none() => Err(MetricError::NilValue),
        _ => Ok(()),
    }
}


#[cfg(test)]
mod tests {
    use crate::store::MemoryRepo;
    use super::*;

    fn usecase() -> MetricsUseCase {
        MetricsUseCase::new(Arc::new(MemoryRepo::new()))
    }

    #[tokio::test]
    async fn missing_scalar_is_rejected() {
        let uc = usecase();

        let mut counter = Metric::counter("c", 1);
        counter.delta = None;
        assert!(matches!(
            uc.update_metric(&counter).await.unwrap_err(),
            MetricError::NilValue,
        ));

        let mut gauge = Metric::gauge("g", 1.0);
        gauge.value = None;
        assert!(matches!(
            uc.update_metric(&gauge).await.unwrap_err(),
            MetricError::NilValue,
        ));
    }

    #[tokio::test]
    async fn empty_id_is_rejected() {
        let uc = usecase();
        let err = uc.update_metric(&Metric::gauge("", 1.0)).await.unwrap_err();
        assert!(matches!(err, MetricError::NilValue));
    }

    #[tokio::test]
    async fn mismatched_scalar_is_ignored_by_kind() {
        // The scalar not matching the kind is simply not consulted.
        let uc = usecase();
        let mut m = Metric::counter("c", 3);
        m.value = Some(9.0);
        let stored = uc.update_metric(&m).await.unwrap();
        assert_eq!(stored.delta, Some(3));
        assert_eq!(stored.value, None);
    }

    #[tokio::test]
    async fn batch_short_circuits_on_first_bad_entry() {
        let uc = usecase();

        let mut bad = Metric::counter("bad", 1);
        bad.delta = None;
        let batch = [Metric::counter("a", 1), bad, Metric::counter("b", 1)];
        assert!(uc.update_metrics(&batch).await.is_err());

        // Nothing from the batch may have been applied.
        assert!(uc.get_metric(MetricKind::Counter, "a").await.is_err());
        assert!(uc.get_metric(MetricKind::Counter, "b").await.is_err());
    }

    #[tokio::test]
    async fn valid_batch_reports_post_merge_state() {
        let uc = usecase();
        uc.update_metric(&Metric::counter("a", 1)).await.unwrap();

        let out = uc.update_metrics(&[
            Metric::counter("a", 4),
            Metric::gauge("b", 2.0),
        ]).await.unwrap();

        assert_eq!(out[0].delta, Some(5));
        assert_eq!(out[1].value, Some(2.0));
    }
}
