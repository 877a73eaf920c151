//! Wire types and transport glue for the `metrond.Metrics` service.
//!
//! This module is committed in the shape `tonic`'s generator produces for a
//! proto definition, so that building does not depend on `protoc` being
//! installed. The message set mirrors the JSON wire model: `delta`/`value`
//! are optional and populated according to `type`.

#![allow(dead_code)]

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metric {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    /// "gauge" or "counter", same casing as the HTTP surface.
    #[prost(string, tag = "2")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(int64, optional, tag = "3")]
    pub delta: ::core::option::Option<i64>,
    #[prost(double, optional, tag = "4")]
    pub value: ::core::option::Option<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateMetricRequest {
    #[prost(message, optional, tag = "1")]
    pub metric: ::core::option::Option<Metric>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateMetricResponse {
    #[prost(message, optional, tag = "1")]
    pub updated_metric: ::core::option::Option<Metric>,
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateMetricsRequest {
    #[prost(message, repeated, tag = "1")]
    pub request_metrics: ::prost::alloc::vec::Vec<Metric>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateMetricsResponse {
    #[prost(message, repeated, tag = "1")]
    pub updated_metrics: ::prost::alloc::vec::Vec<Metric>,
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMetricByNameRequest {
    #[prost(string, tag = "1")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMetricByNameResponse {
    #[prost(message, optional, tag = "1")]
    pub metric: ::core::option::Option<Metric>,
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAllMetricsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAllMetricsResponse {
    #[prost(message, repeated, tag = "1")]
    pub gauge_metrics: ::prost::alloc::vec::Vec<Metric>,
    #[prost(message, repeated, tag = "2")]
    pub counter_metrics: ::prost::alloc::vec::Vec<Metric>,
    #[prost(string, tag = "3")]
    pub error: ::prost::alloc::string::String,
}

/// Client implementation for the `metrond.Metrics` service.
pub mod metrics_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct MetricsClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl MetricsClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> MetricsClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub async fn update_metric(
            &mut self,
            request: impl tonic::IntoRequest<super::UpdateMetricRequest>,
        ) -> std::result::Result<tonic::Response<super::UpdateMetricResponse>, tonic::Status> {
            self.unary(request, "UpdateMetric").await
        }

        pub async fn update_metrics(
            &mut self,
            request: impl tonic::IntoRequest<super::UpdateMetricsRequest>,
        ) -> std::result::Result<tonic::Response<super::UpdateMetricsResponse>, tonic::Status> {
            self.unary(request, "UpdateMetrics").await
        }

        pub async fn get_metric_by_name(
            &mut self,
            request: impl tonic::IntoRequest<super::GetMetricByNameRequest>,
        ) -> std::result::Result<tonic::Response<super::GetMetricByNameResponse>, tonic::Status> {
            self.unary(request, "GetMetricByName").await
        }

        pub async fn get_all_metrics(
            &mut self,
            request: impl tonic::IntoRequest<super::GetAllMetricsRequest>,
        ) -> std::result::Result<tonic::Response<super::GetAllMetricsResponse>, tonic::Status> {
            self.unary(request, "GetAllMetrics").await
        }

        async fn unary<Req, Resp>(
            &mut self,
            request: impl tonic::IntoRequest<Req>,
            method: &'static str,
        ) -> std::result::Result<tonic::Response<Resp>, tonic::Status>
        where
            Req: prost::Message + 'static,
            Resp: prost::Message + Default + 'static,
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_maybe_shared(
                format!("/metrond.Metrics/{method}"),
            ).expect("invalid method path");
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new("metrond.Metrics", method));
            self.inner.unary(req, path, codec).await
        }
    }
}

/// Server implementation for the `metrond.Metrics` service.
pub mod metrics_server {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;

    /// Trait to implement with the actual service logic, for use with
    /// `MetricsServer`.
    #[async_trait]
    pub trait Metrics: Send + Sync + 'static {
        async fn update_metric(
            &self,
            request: tonic::Request<super::UpdateMetricRequest>,
        ) -> std::result::Result<tonic::Response<super::UpdateMetricResponse>, tonic::Status>;

        async fn update_metrics(
            &self,
            request: tonic::Request<super::UpdateMetricsRequest>,
        ) -> std::result::Result<tonic::Response<super::UpdateMetricsResponse>, tonic::Status>;

        async fn get_metric_by_name(
            &self,
            request: tonic::Request<super::GetMetricByNameRequest>,
        ) -> std::result::Result<tonic::Response<super::GetMetricByNameResponse>, tonic::Status>;

        async fn get_all_metrics(
            &self,
            request: tonic::Request<super::GetAllMetricsRequest>,
        ) -> std::result::Result<tonic::Response<super::GetAllMetricsResponse>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct MetricsServer<T: Metrics> {
        inner: Arc<T>,
    }

    impl<T: Metrics> MetricsServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T: Metrics> Clone for MetricsServer<T> {
        fn clone(&self) -> Self {
            Self { inner: Arc::clone(&self.inner) }
        }
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for MetricsServer<T>
    where
        T: Metrics,
        B: Body + Send + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            macro_rules! unary {
                ($request:ty, $response:ty, $method:ident) => {{
                    struct Svc<T: Metrics>(Arc<T>);
                    impl<T: Metrics> tonic::server::UnaryService<$request> for Svc<T> {
                        type Response = $response;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(&mut self, request: tonic::Request<$request>) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            Box::pin(async move {
                                <T as Metrics>::$method(&inner, request).await
                            })
                        }
                    }

                    let inner = Arc::clone(&self.inner);
                    Box::pin(async move {
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        Ok(grpc.unary(Svc(inner), req).await)
                    })
                }};
            }

            match req.uri().path() {
                "/metrond.Metrics/UpdateMetric" => unary!(
                    super::UpdateMetricRequest,
                    super::UpdateMetricResponse,
                    update_metric
                ),
                "/metrond.Metrics/UpdateMetrics" => unary!(
                    super::UpdateMetricsRequest,
                    super::UpdateMetricsResponse,
                    update_metrics
                ),
                "/metrond.Metrics/GetMetricByName" => unary!(
                    super::GetMetricByNameRequest,
                    super::GetMetricByNameResponse,
                    get_metric_by_name
                ),
                "/metrond.Metrics/GetAllMetrics" => unary!(
                    super::GetAllMetricsRequest,
                    super::GetAllMetricsResponse,
                    get_all_metrics
                ),
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(empty_body())
                        .unwrap())
                }),
            }
        }
    }

    impl<T: Metrics> tonic::server::NamedService for MetricsServer<T> {
        const NAME: &'static str = "metrond.Metrics";
    }
}
