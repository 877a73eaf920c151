use bytes::Bytes;
use http_body_util::{BodyExt, Limited};

use crate::prelude::*;


/// Body type for everything we send: the complete payload in one buffer.
/// Metric payloads are tiny, so streaming would buy nothing here.
pub(crate) type ByteBody = http_body_util::Full<Bytes>;

/// Upper bound on buffered request bodies. The largest legitimate payload is
/// a batch update, and even a generous one stays far below this.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Buffers an incoming HTTP body, refusing anything over [`MAX_BODY_BYTES`].
pub(crate) async fn read_body<B>(body: B) -> Result<Bytes>
where
    B: hyper::body::Body,
    B::Error: 'static + Send + Sync + std::error::Error,
{
    match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) => bail!("failed to read HTTP body: {e}"),
    }
}

/// Future that resolves when a shutdown signal (SIGINT, SIGTERM or SIGQUIT)
/// is received by our app.
pub(crate) async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())
        .expect("failed to install SIGINT handler");
    let mut terminate = signal(SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    let mut quit = signal(SignalKind::quit())
        .expect("failed to install SIGQUIT handler");

    tokio::select! {
        _ = interrupt.recv() => {},
        _ = terminate.recv() => {},
        _ = quit.recv() => {},
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_body_buffers_small_payloads() {
        let body = ByteBody::new(Bytes::from_static(b"{\"id\":\"x\"}"));
        assert_eq!(read_body(body).await.unwrap().as_ref(), b"{\"id\":\"x\"}");
    }

    #[tokio::test]
    async fn read_body_rejects_oversized_payloads() {
        let body = ByteBody::new(Bytes::from(vec![0u8; MAX_BODY_BYTES + 1]));
        assert!(read_body(body).await.is_err());
    }
}
