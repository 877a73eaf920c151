//! The agent process: a collector ticker, a report ticker and a bounded
//! worker pool, all torn down together on a shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::Secret;
use serde::Deserialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;

use crate::{
    config::Config,
    crypto,
    grpc::proto::metrics_client::MetricsClient,
    prelude::*,
    store::MemoryRepo,
    usecase::MetricsUseCase,
    util,
};
use self::{collector::Collector, sender::JOB_QUEUE_CAPACITY};

mod collector;
mod sender;


#[derive(Debug, confique::Config)]
pub(crate) struct AgentConfig {
    /// Address and port of the metric server to report to.
    #[config(default = "localhost:8080", env = "ADDRESS")]
    pub(crate) server_address: String,

    /// How often host and process metrics are sampled.
    #[config(default = "2s", env = "POLL_INTERVAL",
        deserialize_with = crate::config::deserialize_duration)]
    pub(crate) poll_interval: Duration,

    /// How often collected metrics are shipped to the server.
    #[config(default = "10s", env = "REPORT_INTERVAL",
        deserialize_with = crate::config::deserialize_duration)]
    pub(crate) report_interval: Duration,

    /// Number of concurrent sender workers.
    #[config(default = 1, env = "RATE_LIMIT")]
    pub(crate) rate_limit: usize,

    /// Pre-shared key. When set, every request body is signed with
    /// HMAC-SHA256 and the signature is sent in the `HashSHA256` header.
    #[config(env = "KEY")]
    pub(crate) key: Option<Secret<String>>,

    /// Path to the server's RSA public key (PEM). When set, request bodies
    /// are encrypted before compression is applied.
    #[config(env = "CRYPTO_KEY")]
    pub(crate) crypto_key: Option<PathBuf>,

    /// Transport used to ship metrics: "http" or "grpc".
    #[config(default = "http")]
    pub(crate) transport: Transport,

    /// What to do when the send queue is full: "drop" the metric (it will be
    /// re-read from the repository on the next report tick) or "block" until
    /// a worker frees a slot.
    #[config(default = "drop")]
    pub(crate) queue_policy: QueuePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Transport {
    Http,
    Grpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum QueuePolicy {
    Drop,
    Block,
}

/// Runs the agent until a shutdown signal arrives.
pub(crate) async fn run(config: Config) -> Result<()> {
    let config = config.agent;
    if config.rate_limit == 0 {
        bail!("agent.rate_limit must be at least 1");
    }
    if config.poll_interval.is_zero() || config.report_interval.is_zero() {
        bail!("agent.poll_interval and agent.report_interval must be non-zero");
    }

    let metrics = MetricsUseCase::new(Arc::new(MemoryRepo::new()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (jobs_tx, jobs_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
    let jobs_rx = Arc::new(Mutex::new(jobs_rx));

    let mut workers = JoinSet::new();
    match config.transport {
        Transport::Http => {
            let rsa_key = config.crypto_key.as_deref()
                .map(crypto::load_public_key)
                .transpose()?;
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .context("failed to build HTTP client")?;
            let url = Arc::new(format!("http://{}/update", config.server_address));

            for _ in 0..config.rate_limit {
                workers.spawn(sender::http_worker(
                    client.clone(),
                    Arc::clone(&url),
                    config.key.clone(),
                    rsa_key.clone(),
                    Arc::clone(&jobs_rx),
                ));
            }
        }
        Transport::Grpc => {
            let client = MetricsClient::connect(format!("http://{}", config.server_address))
                .await
                .context(format!("failed to connect to gRPC server {}", config.server_address))?;

            for _ in 0..config.rate_limit {
                workers.spawn(sender::grpc_worker(client.clone(), Arc::clone(&jobs_rx)));
            }
        }
    }
    info!(
        "Agent started: reporting to {} via {:?} with {} workers",
        config.server_address, config.transport, config.rate_limit,
    );

    let collector_task = tokio::spawn(run_collector(
        metrics.clone(),
        config.poll_interval,
        shutdown_rx.clone(),
    ));
    let dispatcher_task = tokio::spawn(sender::run_dispatcher(
        metrics,
        config.report_interval,
        jobs_tx,
        config.queue_policy,
        shutdown_rx,
    ));

    util::shutdown_signal().await;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    // The dispatcher owns the queue sender. Once it returns, the channel
    // closes and the workers exit after draining what is left.
    collector_task.await.context("collector task panicked")?;
    dispatcher_task.await.context("dispatcher task panicked")?;
    while let Some(worker) = workers.join_next().await {
        worker.context("sender worker panicked")?;
    }

    info!("Agent shut down gracefully");
    Ok(())
}

async fn run_collector(
    metrics: MetricsUseCase,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut collector = Collector::new(metrics);
    let mut ticker = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = collector.collect().await {
                    warn!("Metric collection failed: {e}");
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}
