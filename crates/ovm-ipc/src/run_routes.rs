//! Control routes for the `run` command pipe (`ovm-<name>`).

use crate::server::{StopLatch, log_requests};
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use ovm_core::Capabilities;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Keepalive cadence of the `/exec` event stream.
const EXEC_KEEPALIVE: Duration = Duration::from_secs(3);

/// Shared state of the run control surface.
#[derive(Clone)]
pub struct RunState {
    /// Managed distro name.
    pub distro: String,
    /// Host port of the guest container endpoint.
    pub podman_port: u16,
    /// Capability flags (for `stopped_with_api`).
    pub caps: Arc<Capabilities>,
    /// Stop latch shared with the server shutdown path.
    pub stop_latch: Arc<StopLatch>,
}

/// Builds the run router.
#[must_use]
pub fn run_router(state: RunState) -> Router {
    Router::new()
        .route("/info", get(info))
        .route("/request-stop", post(request_stop))
        .route("/stop", post(stop))
        .route("/exec", post(exec))
        .layer(middleware::from_fn(enforce_method))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Strict per-path method contract; mismatches are 400, not 405.
async fn enforce_method(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let expected = match request.uri().path() {
        "/info" => Some(Method::GET),
        "/request-stop" | "/stop" | "/exec" => Some(Method::POST),
        _ => None,
    };

    if let Some(expected) = expected {
        if request.method() != expected {
            tracing::warn!(
                method = %request.method(),
                path = request.uri().path(),
                "Method not allowed"
            );
            let hint = format!("{} only", expected.as_str().to_lowercase());
            return (StatusCode::BAD_REQUEST, hint).into_response();
        }
    }

    next.run(request).await
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    #[serde(rename = "podmanHost")]
    podman_host: &'static str,
    #[serde(rename = "podmanPort")]
    podman_port: u16,
}

async fn info(State(state): State<RunState>) -> Response {
    axum::Json(InfoResponse {
        podman_host: "127.0.0.1",
        podman_port: state.podman_port,
    })
    .into_response()
}

async fn request_stop(State(state): State<RunState>) -> Response {
    state.stop_latch.begin();

    let result = ovm_wsl::distro::request_stop(&state.distro).await;
    let response = match result {
        Ok(()) => {
            state.caps.set_stopped_with_api();
            StatusCode::OK.into_response()
        }
        Err(e) => {
            tracing::warn!("Failed to request stop: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to request stop").into_response()
        }
    };

    state.stop_latch.finish();
    response
}

async fn stop(State(state): State<RunState>) -> Response {
    state.stop_latch.begin();

    let result = ovm_wsl::distro::stop(&state.distro).await;
    let response = match result {
        Ok(()) => {
            state.caps.set_stopped_with_api();
            StatusCode::OK.into_response()
        }
        Err(e) => {
            tracing::warn!("Failed to stop: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to stop").into_response()
        }
    };

    state.stop_latch.finish();
    response
}

#[derive(Debug, Deserialize)]
struct ExecBody {
    command: String,
}

/// Runs a shell command inside the distro, streaming output as
/// Server-Sent Events: `out` frames per output chunk, `error` frames
/// on failure, comment keepalives, and a final `done` frame.
async fn exec(State(state): State<RunState>, body: Bytes) -> Response {
    let body: ExecBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("Failed to decode request body: {e}");
            return (StatusCode::BAD_REQUEST, "failed to decode request body").into_response();
        }
    };

    let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, std::convert::Infallible>>();
    tokio::spawn(stream_exec(state.distro.clone(), body.command, tx));

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(UnboundedReceiverStream::new(rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Drives one `/exec` stream to completion.
async fn stream_exec(
    distro: String,
    command: String,
    tx: mpsc::UnboundedSender<Result<Bytes, std::convert::Infallible>>,
) {
    let send = |frame: String| {
        let _ = tx.send(Ok(Bytes::from(frame)));
    };

    let mut child = match ovm_wsl::exec::spawn_shell(&distro, &command) {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!("Failed to spawn exec command: {e}");
            send(sse_frame("error", &e.to_string()));
            send(sse_frame("done", "done"));
            return;
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    if let Some(stdout) = stdout {
        forward_lines(stdout, line_tx.clone());
    }
    if let Some(stderr) = stderr {
        forward_lines(stderr, line_tx.clone());
    }
    drop(line_tx);

    let mut keepalive = tokio::time::interval(EXEC_KEEPALIVE);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keepalive.tick().await; // immediate first tick

    let mut last_line = String::new();
    let mut lines_open = true;

    loop {
        tokio::select! {
            line = line_rx.recv(), if lines_open => match line {
                Some(line) => {
                    last_line.clone_from(&line);
                    send(sse_frame("out", &line));
                }
                None => lines_open = false,
            },
            status = child.wait(), if !lines_open => {
                match status {
                    Ok(status) if status.success() => {}
                    Ok(status) => {
                        send(sse_frame("error", &format!("{last_line}\n{status}")));
                    }
                    Err(e) => {
                        send(sse_frame("error", &e.to_string()));
                    }
                }
                break;
            }
            _ = keepalive.tick() => {
                send(": ping\n\n".to_string());
            }
        }
    }

    send(sse_frame("done", "done"));
}

/// Spawns a line-forwarding task for one output stream.
fn forward_lines(
    stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    tx: mpsc::UnboundedSender<String>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// Renders one SSE frame; embedded newlines continue the data field.
fn sse_frame(event: &str, data: &str) -> String {
    let encoded = data.trim().replace('\n', "\ndata: ");
    format!("event: {event}\ndata: {encoded}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> RunState {
        RunState {
            distro: "ovm-test".to_string(),
            podman_port: 7591,
            caps: Arc::new(Capabilities::new()),
            stop_latch: Arc::new(StopLatch::new()),
        }
    }

    #[tokio::test]
    async fn info_reports_endpoint() {
        let app = run_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["podmanHost"], "127.0.0.1");
        assert_eq!(json["podmanPort"], 7591);
    }

    #[tokio::test]
    async fn info_rejects_post() {
        let app = run_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/info")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn exec_rejects_malformed_body() {
        let app = run_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/exec")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let app = run_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn sse_frames_continue_embedded_newlines() {
        assert_eq!(sse_frame("out", "hello"), "event: out\ndata: hello\n\n");
        assert_eq!(
            sse_frame("out", "a\nb\n"),
            "event: out\ndata: a\ndata: b\n\n"
        );
    }
}
