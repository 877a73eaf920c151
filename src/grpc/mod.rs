//! The gRPC mirror of the HTTP verbs. Same validation, same `(type, id)`
//! semantics; responses carry either data or a textual `error` field instead
//! of a non-OK gRPC status.

use tonic::{Request, Response, Status};

use crate::{
    model::{Metric, MetricError, MetricKind},
    prelude::*,
    usecase::MetricsUseCase,
};

pub(crate) mod proto;

use proto::metrics_server::{Metrics, MetricsServer};


#[derive(Debug, confique::Config)]
pub(crate) struct GrpcConfig {
    /// Address and port for the gRPC listener. The gRPC surface is only
    /// served when this is set.
    #[config(env = "GRPC_ADDRESS")]
    pub(crate) address: Option<String>,
}

/// Runs the gRPC listener until the shutdown signal fires.
pub(crate) async fn serve(
    address: &str,
    metrics: MetricsUseCase,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let addr = tokio::net::lookup_host(address).await
        .context(format!("failed to resolve gRPC address '{address}'"))?
        .next()
        .ok_or_else(|| anyhow!("gRPC address '{address}' resolved to nothing"))?;

    info!("Listening on grpc://{addr}");
    tonic::transport::Server::builder()
        .add_service(MetricsServer::new(MetricsService { metrics }))
        .serve_with_shutdown(addr, async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("gRPC server failed")
}

pub(crate) struct MetricsService {
    metrics: MetricsUseCase,
}

#[async_trait::async_trait]
impl Metrics for MetricsService {
    async fn update_metric(
        &self,
        request: Request<proto::UpdateMetricRequest>,
    ) -> Result<Response<proto::UpdateMetricResponse>, Status> {
        let mut response = proto::UpdateMetricResponse::default();

        match try_update_one(&self.metrics, request.into_inner().metric).await {
            Ok(stored) => response.updated_metric = Some(to_wire(stored)),
            Err(e) => response.error = error_text(&e),
        }

        Ok(Response::new(response))
    }

    async fn update_metrics(
        &self,
        request: Request<proto::UpdateMetricsRequest>,
    ) -> Result<Response<proto::UpdateMetricsResponse>, Status> {
        let mut response = proto::UpdateMetricsResponse::default();

        let metrics: Result<Vec<Metric>, MetricError> = request.into_inner().request_metrics
            .iter()
            .map(from_wire)
            .collect();

        let stored = match metrics {
            Ok(metrics) => self.metrics.update_metrics(&metrics).await,
            Err(e) => Err(e),
        };
        match stored {
            Ok(stored) => {
                response.updated_metrics = stored.into_iter().map(to_wire).collect();
            }
            Err(e) => response.error = error_text(&e),
        }

        Ok(Response::new(response))
    }

    async fn get_metric_by_name(
        &self,
        request: Request<proto::GetMetricByNameRequest>,
    ) -> Result<Response<proto::GetMetricByNameResponse>, Status> {
        let mut response = proto::GetMetricByNameResponse::default();
        let request = request.into_inner();

        let result = match request.r#type.parse::<MetricKind>() {
            Ok(kind) => self.metrics.get_metric(kind, &request.name).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(stored) => response.metric = Some(to_wire(stored)),
            Err(e) => response.error = error_text(&e),
        }

        Ok(Response::new(response))
    }

    async fn get_all_metrics(
        &self,
        _request: Request<proto::GetAllMetricsRequest>,
    ) -> Result<Response<proto::GetAllMetricsResponse>, Status> {
        let mut response = proto::GetAllMetricsResponse::default();

        let gauges = self.metrics.all_metrics(MetricKind::Gauge).await;
        let counters = self.metrics.all_metrics(MetricKind::Counter).await;
        match (gauges, counters) {
            (Ok(gauges), Ok(counters)) => {
                response.gauge_metrics = gauges.into_iter().map(to_wire).collect();
                response.counter_metrics = counters.into_iter().map(to_wire).collect();
            }
            (Err(e), _) | (_, Err(e)) => response.error = error_text(&e),
        }

        Ok(Response::new(response))
    }
}

async fn try_update_one(
    metrics: &MetricsUseCase,
    wire: Option<proto::Metric>,
) -> Result<Metric, MetricError> {
    let wire = wire.ok_or(MetricError::NilValue)?;
    let metric = from_wire(&wire)?;
    metrics.update_metric(&metric).await
}

fn from_wire(wire: &proto::Metric) -> Result<Metric, MetricError> {
    Ok(Metric {
        id: wire.id.clone(),
        kind: wire.r#type.parse()?,
        delta: wire.delta,
        value: wire.value,
    })
}

pub(crate) fn to_wire(metric: Metric) -> proto::Metric {
    proto::Metric {
        id: metric.id,
        r#type: metric.kind.as_str().to_owned(),
        delta: metric.delta,
        value: metric.value,
    }
}

fn error_text(err: &MetricError) -> String {
    if let MetricError::Internal(e) = err {
        error!("Repository error while handling RPC: {e:#}");
    }
    // `Internal`'s display is just "internal error"; details stay in the log.
    err.to_string()
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::store::MemoryRepo;
    use super::*;

    fn service() -> MetricsService {
        MetricsService {
            metrics: MetricsUseCase::new(Arc::new(MemoryRepo::new())),
        }
    }

    fn wire_counter(id: &str, delta: i64) -> proto::Metric {
        proto::Metric {
            id: id.into(),
            r#type: "counter".into(),
            delta: Some(delta),
            value: None,
        }
    }

    #[tokio::test]
    async fn update_metric_echoes_running_sum() {
        let svc = service();

        for expected in [3, 6] {
            let response = svc.update_metric(Request::new(proto::UpdateMetricRequest {
                metric: Some(wire_counter("x", 3)),
            })).await.unwrap().into_inner();

            assert_eq!(response.error, "");
            assert_eq!(response.updated_metric.unwrap().delta, Some(expected));
        }
    }

    #[tokio::test]
    async fn update_metric_reports_validation_errors() {
        let svc = service();

        let mut bad = wire_counter("x", 0);
        bad.delta = None;
        let response = svc.update_metric(Request::new(proto::UpdateMetricRequest {
            metric: Some(bad),
        })).await.unwrap().into_inner();
        assert_eq!(response.error, "value for update metric is nil");

        let mut bad = wire_counter("x", 1);
        bad.r#type = "histogram".into();
        let response = svc.update_metric(Request::new(proto::UpdateMetricRequest {
            metric: Some(bad),
        })).await.unwrap().into_inner();
        assert_eq!(response.error, "unsupported metric type");
    }

    #[tokio::test]
    async fn get_metric_by_name_maps_not_found() {
        let svc = service();
        let response = svc.get_metric_by_name(Request::new(proto::GetMetricByNameRequest {
            r#type: "counter".into(),
            name: "missing".into(),
        })).await.unwrap().into_inner();

        assert!(response.metric.is_none());
        assert_eq!(response.error, "can't find metric");
    }

    #[tokio::test]
    async fn get_all_metrics_splits_by_kind() {
        let svc = service();
        svc.update_metric(Request::new(proto::UpdateMetricRequest {
            metric: Some(wire_counter("c", 1)),
        })).await.unwrap();
        svc.update_metric(Request::new(proto::UpdateMetricRequest {
            metric: Some(proto::Metric {
                id: "g".into(),
                r#type: "gauge".into(),
                delta: None,
                value: Some(1.5),
            }),
        })).await.unwrap();

        let response = svc.get_all_metrics(Request::new(proto::GetAllMetricsRequest {}))
            .await.unwrap().into_inner();
        assert_eq!(response.gauge_metrics.len(), 1);
        assert_eq!(response.counter_metrics.len(), 1);
        assert_eq!(response.error, "");
    }
}
