use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use hyper::{
    body::Incoming,
    header,
    http::request::Parts,
    Method, Request, StatusCode,
};

use crate::{
    model::{Metric, MetricError, MetricKind},
    prelude::*,
    util::read_body,
};
use super::{middleware, response, Context, Response};


/// This is the main HTTP entry point, called for each incoming request.
pub(super) async fn handle(req: Request<Incoming>, ctx: Arc<Context>) -> Response {
    let time_incoming = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    if ctx.log_http_headers {
        let mut out = String::new();
        for (name, value) in req.headers() {
            use std::fmt::Write;
            write!(out, "\n  {}: {}", name, String::from_utf8_lossy(value.as_bytes())).unwrap();
        }
        trace!("HTTP Headers: {}", out);
    }

    let response = process(req, &ctx).await.unwrap_or_else(|r| r);

    info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        duration = ?time_incoming.elapsed(),
        size = body_len(&response),
        "Handled request",
    );
    response
}

/// Runs one request through the middleware chain and the router. `Err` is
/// the short-circuit response of a middleware.
async fn process(req: Request<Incoming>, ctx: &Context) -> Result<Response, Response> {
    let (parts, body) = req.into_parts();
    let body = read_body(body).await.map_err(|e| {
        warn!("Failed to read request body: {e}");
        response::internal_server_error()
    })?;

    let decoded = middleware::decode_request(&parts, body, ctx)?;
    let response = route(&parts, decoded.body, ctx).await.unwrap_or_else(|r| r);
    Ok(middleware::encode_response(&parts, response, decoded.hmac_echo).await)
}

async fn route(parts: &Parts, body: Bytes, ctx: &Context) -> Result<Response, Response> {
    let path = parts.uri.path().trim_end_matches('/');
    let segments: Vec<&str> = path.split('/').skip(1).collect();

    match (&parts.method, segments.as_slice()) {
        (&Method::POST, ["update", kind, name, value]) => {
            update_from_path(parts, ctx, kind, name, value).await
        }
        (&Method::POST, ["update"]) => update_from_json(parts, body, ctx).await,
        (&Method::POST, ["updates"]) => update_batch_from_json(parts, body, ctx).await,
        (&Method::POST, ["value"]) => value_from_json(parts, body, ctx).await,
        (&Method::GET, ["value", kind, name]) => value_as_text(ctx, kind, name).await,
        (&Method::GET, ["ping"]) => ping(ctx).await,
        (&Method::GET, []) => index(ctx).await,

        (method, _) if method != Method::GET && method != Method::POST => {
            debug!("Responding 405 Method not allowed to {method:?} {path}");
            Ok(hyper::Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .body("405 Method not allowed".into())
                .unwrap())
        }

        _ => Ok(response::not_found()),
    }
}

/// `POST /update/{type}/{name}/{value}`: the plain-text update form. The
/// scalar arrives as a path segment and is parsed according to the metric
/// kind. Replies 200 with an empty body.
async fn update_from_path(
    parts: &Parts,
    ctx: &Context,
    kind: &str,
    name: &str,
    value: &str,
) -> Result<Response, Response> {
    check_content_type(parts, "text/plain")?;

    let kind: MetricKind = kind.parse().map_err(error_response)?;
    let metric = match kind {
        MetricKind::Counter => {
            let delta = value.parse::<i64>()
                .map_err(|_| error_response(MetricError::UnsupportedValueType))?;
            Metric::counter(name, delta)
        }
        MetricKind::Gauge => {
            let value = value.parse::<f64>()
                .map_err(|_| error_response(MetricError::UnsupportedValueType))?;
            Metric::gauge(name, value)
        }
    };

    ctx.metrics.update_metric(&metric).await.map_err(error_response)?;
    Ok(response::ok_empty())
}

/// `POST /update`: JSON update. The response body is the post-merge metric,
/// so updating a counter echoes the new running sum.
async fn update_from_json(
    parts: &Parts,
    body: Bytes,
    ctx: &Context,
) -> Result<Response, Response> {
    check_content_type(parts, "application/json")?;

    let metric: Metric = serde_json::from_slice(&body)
        .map_err(|e| response::bad_request(format!("invalid metric JSON: {e}")))?;

    let stored = ctx.metrics.update_metric(&metric).await.map_err(error_response)?;
    Ok(json_response(&stored))
}

/// `POST /updates`: JSON array update, atomic on backends with transactions.
async fn update_batch_from_json(
    parts: &Parts,
    body: Bytes,
    ctx: &Context,
) -> Result<Response, Response> {
    check_content_type(parts, "application/json")?;

    let metrics: Vec<Metric> = serde_json::from_slice(&body)
        .map_err(|e| response::bad_request(format!("invalid metric array JSON: {e}")))?;

    let stored = ctx.metrics.update_metrics(&metrics).await.map_err(error_response)?;
    Ok(json_response(&stored))
}

/// `POST /value`: JSON read. Only `id` and `type` of the request body are
/// used; the response is the full stored metric.
async fn value_from_json(
    parts: &Parts,
    body: Bytes,
    ctx: &Context,
) -> Result<Response, Response> {
    check_content_type(parts, "application/json")?;

    let request: Metric = serde_json::from_slice(&body)
        .map_err(|e| response::bad_request(format!("invalid metric JSON: {e}")))?;

    let stored = ctx.metrics.get_metric(request.kind, &request.id).await
        .map_err(error_response)?;
    Ok(json_response(&stored))
}

/// `GET /value/{type}/{name}`: the stored scalar as plain text.
async fn value_as_text(ctx: &Context, kind: &str, name: &str) -> Result<Response, Response> {
    let kind: MetricKind = kind.parse().map_err(error_response)?;
    let stored = ctx.metrics.get_metric(kind, name).await.map_err(error_response)?;
    Ok(response::plain_text(stored.scalar_text()))
}

/// `GET /ping`: 200 iff the repository backend is reachable.
async fn ping(ctx: &Context) -> Result<Response, Response> {
    if ctx.metrics.ping().await {
        Ok(response::ok_empty())
    } else {
        Err(response::internal_server_error())
    }
}

/// `GET /`: a small HTML page listing all stored metrics.
async fn index(ctx: &Context) -> Result<Response, Response> {
    let mut gauges = ctx.metrics.all_metrics(MetricKind::Gauge).await
        .map_err(error_response)?;
    let mut counters = ctx.metrics.all_metrics(MetricKind::Counter).await
        .map_err(error_response)?;
    gauges.sort_by(|a, b| a.id.cmp(&b.id));
    counters.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>Metrics</title></head>\n<body>\n",
    );
    for (title, metrics) in [("Gauge data", &gauges), ("Counter data", &counters)] {
        use std::fmt::Write;
        write!(out, "<h1>{title}</h1>\n<ul>\n").unwrap();
        for metric in metrics {
            write!(
                out,
                "  <li><strong>{}:</strong> {}</li>\n",
                escape_html(&metric.id),
                metric.scalar_text(),
            ).unwrap();
        }
        out.push_str("</ul>\n");
    }
    out.push_str("</body>\n</html>\n");

    Ok(response::html(out))
}

/// JSON endpoints accept an absent content type or the expected one; the
/// path-form update endpoint expects `text/plain`. Anything else is a 400.
fn check_content_type(parts: &Parts, expected: &str) -> Result<(), Response> {
    let content_type = parts.headers.get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap_or(""));

    match content_type {
        None => Ok(()),
        Some(v) if v == expected || v.starts_with(&format!("{expected};")) => Ok(()),
        Some(v) => {
            debug!("Rejecting request with content type '{v}', expected '{expected}'");
            Err(response::bad_request(format!("unsupported content type, expected {expected}")))
        }
    }
}

fn json_response(data: &impl serde::Serialize) -> Response {
    // Serializing a metric cannot fail.
    response::json(serde_json::to_vec(data).unwrap())
}

fn error_response(err: MetricError) -> Response {
    match err {
        MetricError::NotFound => response::not_found(),
        MetricError::Internal(e) => {
            error!("Repository error while handling request: {e:#}");
            response::internal_server_error()
        }
        e => response::bad_request(e.to_string()),
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn body_len(response: &Response) -> u64 {
    use hyper::body::Body;
    response.body().size_hint().exact().unwrap_or(0)
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{store::MemoryRepo, usecase::MetricsUseCase};
    use super::*;

    fn context() -> Context {
        Context {
            metrics: MetricsUseCase::new(Arc::new(MemoryRepo::new())),
            hmac_key: None,
            rsa_key: None,
            trusted_subnet: None,
            log_http_headers: false,
        }
    }

    fn parts(method: Method, path: &str) -> Parts {
        Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    async fn send(ctx: &Context, method: Method, path: &str, body: &str) -> Response {
        let parts = parts(method, path);
        route(&parts, Bytes::copy_from_slice(body.as_bytes()), ctx)
            .await
            .unwrap_or_else(|r| r)
    }

    async fn body_string(response: Response) -> String {
        let bytes = crate::util::read_body(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn counter_updates_accumulate_via_path_form() {
        let ctx = context();
        let r = send(&ctx, Method::POST, "/update/counter/PollCount/5", "").await;
        assert_eq!(r.status(), StatusCode::OK);
        let r = send(&ctx, Method::POST, "/update/counter/PollCount/7", "").await;
        assert_eq!(r.status(), StatusCode::OK);

        let r = send(&ctx, Method::GET, "/value/counter/PollCount", "").await;
        assert_eq!(r.status(), StatusCode::OK);
        assert_eq!(body_string(r).await, "12");
    }

    #[tokio::test]
    async fn gauge_updates_replace_via_path_form() {
        let ctx = context();
        send(&ctx, Method::POST, "/update/gauge/Alloc/1.5", "").await;
        send(&ctx, Method::POST, "/update/gauge/Alloc/2.25", "").await;

        let r = send(&ctx, Method::GET, "/value/gauge/Alloc", "").await;
        assert_eq!(body_string(r).await, "2.25");
    }

    #[tokio::test]
    async fn path_form_rejects_garbage() {
        let ctx = context();
        let r = send(&ctx, Method::POST, "/update/counter/x/notanumber", "").await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
        let r = send(&ctx, Method::POST, "/update/histogram/x/1", "").await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
        // Counters only take integers.
        let r = send(&ctx, Method::POST, "/update/counter/x/1.5", "").await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn json_update_echoes_post_merge_metric() {
        let ctx = context();
        let body = r#"{"id":"x","type":"counter","delta":3}"#;

        let r = send(&ctx, Method::POST, "/update", body).await;
        assert_eq!(r.status(), StatusCode::OK);
        assert_eq!(body_string(r).await, r#"{"id":"x","type":"counter","delta":3}"#);

        let r = send(&ctx, Method::POST, "/update", body).await;
        assert_eq!(body_string(r).await, r#"{"id":"x","type":"counter","delta":6}"#);
    }

    #[tokio::test]
    async fn json_update_rejects_missing_scalar() {
        let ctx = context();
        let r = send(&ctx, Method::POST, "/update", r#"{"id":"x","type":"counter"}"#).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_update_applies_in_order() {
        let ctx = context();
        let body = r#"[
            {"id":"a","type":"counter","delta":1},
            {"id":"b","type":"gauge","value":2.0},
            {"id":"a","type":"counter","delta":4}
        ]"#;

        let r = send(&ctx, Method::POST, "/updates", body).await;
        assert_eq!(r.status(), StatusCode::OK);

        let r = send(&ctx, Method::GET, "/value/counter/a", "").await;
        assert_eq!(body_string(r).await, "5");
        let r = send(&ctx, Method::GET, "/value/gauge/b", "").await;
        assert_eq!(body_string(r).await, "2");
    }

    #[tokio::test]
    async fn value_json_returns_full_metric() {
        let ctx = context();
        send(&ctx, Method::POST, "/update/gauge/Alloc/1.5", "").await;

        let r = send(&ctx, Method::POST, "/value", r#"{"id":"Alloc","type":"gauge"}"#).await;
        assert_eq!(r.status(), StatusCode::OK);
        assert_eq!(body_string(r).await, r#"{"id":"Alloc","type":"gauge","value":1.5}"#);
    }

    #[tokio::test]
    async fn unknown_metric_is_404() {
        let ctx = context();
        let r = send(&ctx, Method::GET, "/value/gauge/missing", "").await;
        assert_eq!(r.status(), StatusCode::NOT_FOUND);
        let r = send(&ctx, Method::POST, "/value", r#"{"id":"missing","type":"counter"}"#).await;
        assert_eq!(r.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_kind_is_400() {
        let ctx = context();
        let r = send(&ctx, Method::GET, "/value/histogram/x", "").await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_content_type_is_rejected() {
        let ctx = context();
        let mut parts = parts(Method::POST, "/update");
        parts.headers.insert(header::CONTENT_TYPE, "text/csv".parse().unwrap());

        let body = Bytes::from_static(br#"{"id":"x","type":"counter","delta":1}"#);
        let r = route(&parts, body, &ctx).await.unwrap_or_else(|r| r);
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ping_is_ok_for_memory_backend() {
        let ctx = context();
        let r = send(&ctx, Method::GET, "/ping", "").await;
        assert_eq!(r.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn index_lists_metrics() {
        let ctx = context();
        send(&ctx, Method::POST, "/update/gauge/Alloc/1.5", "").await;
        send(&ctx, Method::POST, "/update/counter/PollCount/3", "").await;

        let r = send(&ctx, Method::GET, "/", "").await;
        assert_eq!(r.status(), StatusCode::OK);
        let html = body_string(r).await;
        assert!(html.contains("Alloc"));
        assert!(html.contains("PollCount"));
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let ctx = context();
        let r = send(&ctx, Method::GET, "/nope", "").await;
        assert_eq!(r.status(), StatusCode::NOT_FOUND);
    }
}
