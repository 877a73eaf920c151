//! The HTTP server, middlewares and routes.
//!
//! This file itself contains fairly little business logic and just sets up
//! the `hyper` server and catches errors. The request pipeline is in
//! `middleware.rs` and `handlers.rs`.

use futures::FutureExt;
use hyper::service::service_fn;
use hyper_util::{rt::{TokioExecutor, TokioIo}, server::conn::auto::Builder};
use ipnet::IpNet;
use rsa::RsaPrivateKey;
use secrecy::Secret;
use std::{
    convert::Infallible,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};
use tokio::net::TcpListener;

use crate::{
    crypto,
    prelude::*,
    server::ServerConfig,
    usecase::MetricsUseCase,
    util::{self, ByteBody},
};
use self::handlers::handle;

mod handlers;
mod middleware;
pub(crate) mod response;


// Our requests and responses always use this body type.
pub(crate) type Response = hyper::Response<ByteBody>;


/// Context that the request handler has access to.
pub(crate) struct Context {
    pub(crate) metrics: MetricsUseCase,
    pub(crate) hmac_key: Option<Secret<String>>,
    pub(crate) rsa_key: Option<RsaPrivateKey>,
    pub(crate) trusted_subnet: Option<IpNet>,
    pub(crate) log_http_headers: bool,
}

/// Starts the HTTP server and runs it until a shutdown signal arrives. The
/// future returned by this function must be awaited to actually run it.
pub(crate) async fn serve(
    config: &ServerConfig,
    log_http_headers: bool,
    metrics: MetricsUseCase,
) -> Result<()> {
    // A bad key file must bring the process down before we start listening.
    let rsa_key = config.crypto_key.as_deref()
        .map(crypto::load_private_key)
        .transpose()?;

    let ctx = Arc::new(Context {
        metrics,
        hmac_key: config.key.clone(),
        rsa_key,
        trusted_subnet: config.trusted_subnet,
        log_http_headers,
    });

    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let mut signal = std::pin::pin!(util::shutdown_signal());

    let listener = TcpListener::bind(&config.address).await
        .context(format!("failed to bind socket address {}", config.address))?;
    info!("Listening on http://{}",
        listener.local_addr().context("failed to acquire local addr")?);

    loop {
        tokio::select! {
            conn = listener.accept() => {
                let (tcp, _) = conn.context("failed to accept TCP connection")?;
                let io = TokioIo::new(tcp);

                let ctx = Arc::clone(&ctx);
                let watcher = graceful.watcher();
                tokio::task::spawn(async move {
                    let builder = Builder::new(TokioExecutor::new());
                    let handle_conn = builder.serve_connection(io, service_fn(move |req| {
                        let ctx = Arc::clone(&ctx);
                        async move {
                            let method = req.method().clone();
                            let path = req.uri().path().to_owned();

                            // A panicking handler must not take the whole
                            // connection down with it; answer 500 and keep
                            // serving.
                            let outcome = AssertUnwindSafe(handle(req, ctx))
                                .catch_unwind()
                                .await;
                            Ok::<_, Infallible>(outcome.unwrap_or_else(|panic| {
                                error!(
                                    "HTTP handler panicked while serving {method} '{path}': {}",
                                    panic_message(&*panic),
                                );
                                response::internal_server_error()
                            }))
                        }
                    }));
                    let handle_conn = watcher.watch(handle_conn);
                    if let Err(e) = handle_conn.await {
                        warn!("Error serving connection: {e:#}");
                    }
                });
            }

            _ = &mut signal => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    tokio::select! {
        _ = graceful.shutdown() => {
            info!("All HTTP connections gracefully closed");
        },
        _ = tokio::time::sleep(Duration::from_secs(5)) => {
            warn!("Timed out waiting for all HTTP connections to close");
        }
    }

    Ok(())
}

/// Best-effort extraction of a panic payload, which is almost always the
/// `String` or `&str` that `panic!` was invoked with.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic.downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("<opaque payload>")
}
