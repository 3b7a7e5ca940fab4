//! RESTful control server over a named pipe.
//!
//! The pipe is created with an ACL admitting only SYSTEM, built-in
//! administrators and the current user; HTTP/1.1 runs on top, one
//! hyper connection per pipe instance. Shutdown is cooperative: the
//! accept loop exits on cancellation and then waits (bounded) for any
//! in-flight stop request so an API-initiated stop is always observed
//! before the process exits.

use crate::error::Result;
use axum::Router;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long `Close` waits for an in-flight stop request.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Latch tracking in-flight stop handlers.
#[derive(Debug, Default)]
pub struct StopLatch {
    armed: AtomicBool,
    in_flight: AtomicUsize,
    done: tokio::sync::Notify,
}

impl StopLatch {
    /// Creates an unarmed latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a stop handler as entered.
    pub fn begin(&self) {
        self.armed.store(true, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks a stop handler as finished.
    pub fn finish(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.done.notify_waiters();
    }

    /// Waits for in-flight stop handlers, bounded by the grace period.
    /// Returns immediately when no stop was ever requested.
    pub async fn wait(&self) {
        if !self.armed.load(Ordering::SeqCst) {
            return;
        }

        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            let notified = self.done.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!("Gave up waiting for in-flight stop request");
                return;
            }
        }
    }
}

/// Serves `router` on the named pipe at `endpoint` until `cancel`
/// fires, then drains `latch` if one is attached.
#[cfg(windows)]
pub async fn serve(
    endpoint: &str,
    router: Router,
    cancel: CancellationToken,
    latch: Option<Arc<StopLatch>>,
) -> Result<()> {
    use crate::error::IpcError;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper_util::rt::TokioIo;
    use tower::Service;
    use tower_http::trace::TraceLayer;

    let router = router.layer(TraceLayer::new_for_http());

    let mut listener = ovm_win32::npipe::PipeListener::bind(endpoint)?;
    tracing::info!(endpoint, "RESTful server is ready");

    loop {
        let connection = tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!("RESTful server is shutting down");
                break;
            }
            conn = listener.accept() => conn,
        };

        let stream = match connection {
            Ok(stream) => stream,
            Err(e) => {
                if cancel.is_cancelled() {
                    break;
                }
                return Err(IpcError::server(format!("pipe accept failed: {e}")));
            }
        };

        let tower_service = router.clone();
        tokio::spawn(async move {
            let hyper_service =
                hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                    tower_service.clone().call(request)
                });

            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), hyper_service)
                .await
            {
                let err_str = err.to_string().to_lowercase();
                if !err_str.contains("shutting down") && !err_str.contains("broken pipe") {
                    tracing::error!("Error serving pipe connection: {err}");
                }
            }
        });
    }

    if let Some(latch) = latch {
        latch.wait().await;
    }

    Ok(())
}

#[cfg(not(windows))]
pub async fn serve(
    _endpoint: &str,
    _router: Router,
    _cancel: CancellationToken,
    _latch: Option<Arc<StopLatch>>,
) -> Result<()> {
    Err(ovm_win32::Win32Error::unsupported("named pipe server").into())
}

/// Request-log middleware shared by both routers.
pub(crate) async fn log_requests(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    tracing::info!(%method, path, "RESTful server: received request");
    let response = next.run(request).await;
    tracing::info!(%method, path, status = %response.status(), "RESTful server: finished request");

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unarmed_latch_returns_immediately() {
        let latch = StopLatch::new();
        // Must not block.
        latch.wait().await;
    }

    #[tokio::test]
    async fn latch_waits_for_in_flight_stop() {
        let latch = Arc::new(StopLatch::new());
        latch.begin();

        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        latch.finish();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn latch_gives_up_after_grace() {
        let latch = Arc::new(StopLatch::new());
        latch.begin();

        // Never finished; the bounded wait must still come back.
        latch.wait().await;
    }
}
