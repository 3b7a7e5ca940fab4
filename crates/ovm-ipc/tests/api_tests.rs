//! Integration tests for the control-surface routers.
//!
//! These verify the HTTP contract the front-end depends on: strict
//! method enforcement (400), capability guards (403), and the /info
//! shape. The underlying WSL operations are not exercised here.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use ovm_core::{BasicOpts, Capabilities, GateBus, Notifier, Stage};
use ovm_ipc::StopLatch;
use ovm_ipc::init_routes::{InitState, init_router};
use ovm_ipc::run_routes::{RunState, run_router};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tower::ServiceExt;

fn init_state() -> InitState {
    InitState {
        opts: BasicOpts {
            name: "itest".to_string(),
            log_path: std::env::temp_dir(),
            event_pipe_name: "itest-events".to_string(),
            bind_pid: 0,
        },
        caps: Arc::new(Capabilities::new()),
        gates: Arc::new(GateBus::new()),
        notifier: Notifier::disabled(Stage::Init),
        shutdown_armed: Arc::new(AtomicBool::new(false)),
    }
}

fn run_state() -> RunState {
    RunState {
        distro: "ovm-itest".to_string(),
        podman_port: 7654,
        caps: Arc::new(Capabilities::new()),
        stop_latch: Arc::new(StopLatch::new()),
    }
}

async fn status_of(router: axum::Router, method: Method, uri: &str) -> StatusCode {
    router
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

// ============================================================================
// Method contract
// ============================================================================

#[tokio::test]
async fn init_routes_reject_wrong_methods_with_400() {
    for path in [
        "/reboot",
        "/enable-feature",
        "/update-wsl",
        "/fix-wsl-config",
        "/shutdown-wsl",
    ] {
        let status = status_of(init_router(init_state()), Method::GET, path).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "GET {path}");

        // DELETE is wrong everywhere too.
        let status = status_of(init_router(init_state()), Method::DELETE, path).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "DELETE {path}");
    }
}

#[tokio::test]
async fn run_routes_reject_wrong_methods_with_400() {
    for (method, path) in [
        (Method::POST, "/info"),
        (Method::GET, "/request-stop"),
        (Method::GET, "/stop"),
        (Method::PUT, "/exec"),
    ] {
        let status = status_of(run_router(run_state()), method.clone(), path).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{method} {path}");
    }
}

#[tokio::test]
async fn unknown_routes_are_404() {
    assert_eq!(
        status_of(init_router(init_state()), Method::GET, "/nope").await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        status_of(run_router(run_state()), Method::GET, "/nope").await,
        StatusCode::NOT_FOUND
    );
}

// ============================================================================
// Capability guards
// ============================================================================

#[tokio::test]
async fn init_routes_are_guarded_until_granted() {
    for (method, path) in [
        (Method::POST, "/reboot"),
        (Method::POST, "/enable-feature"),
        (Method::PUT, "/update-wsl"),
        (Method::PUT, "/fix-wsl-config"),
        (Method::PUT, "/shutdown-wsl"),
    ] {
        let status = status_of(init_router(init_state()), method.clone(), path).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{method} {path}");
    }
}

#[tokio::test]
async fn granted_reboot_still_validates_the_body() {
    let state = init_state();
    state.caps.set_can_reboot(true);

    let response = init_router(state)
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/reboot")
                .body(Body::from(r#"{"later": true}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    // Missing runOnce is a client error, not a guard miss.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Info contract
// ============================================================================

#[tokio::test]
async fn info_reports_the_container_endpoint() {
    let response = run_router(run_state())
        .oneshot(Request::builder().uri("/info").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["podmanHost"], "127.0.0.1");
    assert_eq!(json["podmanPort"], 7654);
}
