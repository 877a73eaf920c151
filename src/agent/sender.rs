//! Shipping collected metrics to the server: a report ticker drains the
//! agent repository into a bounded job queue, and a pool of workers sends
//! each metric upstream.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use flate2::{Compression, write::GzEncoder};
use rsa::RsaPublicKey;
use secrecy::Secret;
use tokio::sync::{mpsc, Mutex};

use crate::{
    crypto,
    grpc::proto::{self, metrics_client::MetricsClient},
    model::Metric,
    prelude::*,
    usecase::MetricsUseCase,
};
use super::QueuePolicy;


/// Capacity of the job queue between the report ticker and the workers.
pub(super) const JOB_QUEUE_CAPACITY: usize = 18;

/// How often a failed send is retried, and the base wait between attempts.
const SEND_RETRIES: u32 = 3;
const SEND_RETRY_WAIT: Duration = Duration::from_secs(1);

pub(super) type JobReceiver = Arc<Mutex<mpsc::Receiver<Metric>>>;


/// The report ticker: snapshots the repository every `every` and feeds each
/// metric into the job queue. Returns when the shutdown signal fires; the
/// queue sender is dropped with it, which lets the workers drain and exit.
pub(super) async fn run_dispatcher(
    metrics: MetricsUseCase,
    every: Duration,
    jobs: mpsc::Sender<Metric>,
    policy: QueuePolicy,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    // The immediate first tick would report an empty repository.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }

        let batch = match all_metrics(&metrics).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Failed to snapshot agent repository: {e}");
                continue;
            }
        };

        debug!("Dispatching {} metrics to the send queue", batch.len());
        for metric in batch {
            match policy {
                QueuePolicy::Drop => {
                    if let Err(mpsc::error::TrySendError::Full(metric)) = jobs.try_send(metric) {
                        // The next tick re-reads the repository, so the
                        // freshest value gets another chance.
                        warn!("Send queue full, dropping metric '{}'", metric.id);
                    }
                }
                QueuePolicy::Block => {
                    if jobs.send(metric).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn all_metrics(metrics: &MetricsUseCase) -> Result<Vec<Metric>, crate::model::MetricError> {
    let mut out = metrics.all_metrics(crate::model::MetricKind::Gauge).await?;
    out.extend(metrics.all_metrics(crate::model::MetricKind::Counter).await?);
    Ok(out)
}

/// One HTTP worker: reads metrics off the queue until it closes and POSTs
/// each one to `/update`, gzip compressed, optionally RSA encrypted and
/// HMAC signed.
pub(super) async fn http_worker(
    client: reqwest::Client,
    url: Arc<String>,
    hmac_key: Option<Secret<String>>,
    rsa_key: Option<RsaPublicKey>,
    jobs: JobReceiver,
) {
    loop {
        let metric = { jobs.lock().await.recv().await };
        let Some(metric) = metric else {
            break;
        };

        if let Err(e) = send_http(&client, &url, &hmac_key, &rsa_key, &metric).await {
            warn!("Giving up on metric '{}': {e:#}", metric.id);
        }
    }
    trace!("HTTP sender worker exiting");
}

async fn send_http(
    client: &reqwest::Client,
    url: &str,
    hmac_key: &Option<Secret<String>>,
    rsa_key: &Option<RsaPublicKey>,
    metric: &Metric,
) -> Result<()> {
    // The signature always covers the plain JSON; compression and encryption
    // wrap around it afterwards.
    let plain = serde_json::to_vec(metric).context("failed to encode metric")?;
    let signature = hmac_key.as_ref().map(|key| crypto::sign(key, &plain));

    let payload = match rsa_key {
        Some(key) => crypto::encrypt(key, &plain)?,
        None => plain,
    };
    let body = gzip(&payload)?;

    let mut last_error = None;
    for attempt in 1..=SEND_RETRIES + 1 {
        let mut request = client.post(url)
            .header("Content-Type", "application/json")
            .header("Content-Encoding", "gzip")
            .body(body.clone());
        if let Some(signature) = &signature {
            request = request.header(crypto::HASH_HEADER, signature);
        }

        match request.send().await {
            Ok(response) if response.status().is_server_error() => {
                last_error = Some(anyhow!("server replied {}", response.status()));
            }
            Ok(response) if !response.status().is_success() => {
                // A 4xx will not get better by resending the same bytes.
                bail!("server rejected metric with {}", response.status());
            }
            Ok(_) => return Ok(()),
            Err(e) => last_error = Some(e.into()),
        }

        if attempt <= SEND_RETRIES {
            tokio::time::sleep(SEND_RETRY_WAIT * attempt).await;
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("send failed")))
}

/// One gRPC worker: same queue contract as [`http_worker`], but each metric
/// goes out as an `UpdateMetric` RPC.
pub(super) async fn grpc_worker(
    mut client: MetricsClient<tonic::transport::Channel>,
    jobs: JobReceiver,
) {
    loop {
        let metric = { jobs.lock().await.recv().await };
        let Some(metric) = metric else {
            break;
        };

        let request = proto::UpdateMetricRequest {
            metric: Some(crate::grpc::to_wire(metric.clone())),
        };
        match client.update_metric(request).await {
            Ok(response) => {
                let response = response.into_inner();
                if !response.error.is_empty() {
                    warn!("Server rejected metric '{}': {}", metric.id, response.error);
                }
            }
            Err(status) => warn!("UpdateMetric RPC for '{}' failed: {status}", metric.id),
        }
    }
    trace!("gRPC sender worker exiting");
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).context("failed to gzip payload")?;
    encoder.finish().context("failed to gzip payload")
}


#[cfg(test)]
mod tests {
    use crate::{store::MemoryRepo, usecase::MetricsUseCase};
    use super::*;

    /// Fills the queue beyond capacity with the drop policy: the excess must
    /// be dropped without blocking, deadlocking or panicking.
    #[tokio::test]
    async fn dispatcher_drops_excess_instead_of_blocking() {
        let metrics = MetricsUseCase::new(std::sync::Arc::new(MemoryRepo::new()));
        for i in 0..50 {
            metrics.update_metric(&Metric::gauge(format!("g{i}"), i as f64)).await.unwrap();
        }

        let (tx, mut rx) = mpsc::channel::<Metric>(JOB_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let dispatcher = tokio::spawn(run_dispatcher(
            metrics,
            Duration::from_millis(10),
            tx,
            QueuePolicy::Drop,
            shutdown_rx,
        ));

        // Give the dispatcher time for at least one tick, without consuming.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        dispatcher.await.unwrap();

        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert!(queued <= JOB_QUEUE_CAPACITY);
        assert!(queued > 0);
    }

    #[tokio::test]
    async fn workers_drain_queue_after_sender_closes() {
        let (tx, rx) = mpsc::channel::<Metric>(JOB_QUEUE_CAPACITY);
        let rx: JobReceiver = Arc::new(Mutex::new(rx));

        for i in 0..5 {
            tx.send(Metric::counter(format!("c{i}"), i)).await.unwrap();
        }
        drop(tx);

        // A bare drain loop shaped like the workers': it must observe all
        // five metrics and then the closed channel.
        let mut seen = 0;
        loop {
            let metric = { rx.lock().await.recv().await };
            if metric.is_none() {
                break;
            }
            seen += 1;
        }
        assert_eq!(seen, 5);
    }

    #[test]
    fn gzip_roundtrip() {
        use std::io::Read;

        let data = br#"{"id":"Alloc","type":"gauge","value":1.5}"#;
        let compressed = gzip(data).unwrap();

        let mut out = Vec::new();
        flate2::read::GzDecoder::new(compressed.as_slice()).read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
