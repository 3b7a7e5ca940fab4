//! Control routes for the `init` command pipe (`ovm-init-<name>`).
//!
//! Every route is guarded by a capability flag the orchestrator sets
//! after emitting the paired event; a guard miss is 403. Wrong methods
//! are 400, preserving the front-end's existing error handling.

use crate::server::log_requests;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use ovm_core::{BasicOpts, Capabilities, GateBus, Notifier, WslConfigFix};
use ovm_wsl::config::{INCOMPATIBLE_KEYS, WslConfig, write_skip_marker};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared state of the init control surface.
#[derive(Clone)]
pub struct InitState {
    /// Command options.
    pub opts: BasicOpts,
    /// Capability flags (orchestrator-owned, borrowed here).
    pub caps: Arc<Capabilities>,
    /// Gates the parked orchestrator waits on.
    pub gates: Arc<GateBus>,
    /// Event notifier.
    pub notifier: Arc<Notifier>,
    /// Armed by `fix-wsl-config open`; allows `/shutdown-wsl`.
    pub shutdown_armed: Arc<AtomicBool>,
}

/// Builds the init router.
#[must_use]
pub fn init_router(state: InitState) -> Router {
    Router::new()
        .route("/reboot", post(reboot))
        .route("/enable-feature", post(enable_feature))
        .route("/update-wsl", put(update_wsl))
        .route("/fix-wsl-config", put(fix_wsl_config))
        .route("/shutdown-wsl", put(shutdown_wsl))
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
        "/reboot" | "/enable-feature" => Some(Method::POST),
        "/update-wsl" | "/fix-wsl-config" | "/shutdown-wsl" => Some(Method::PUT),
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

#[derive(Debug, Deserialize)]
struct RebootBody {
    /// Command registered to run after the next logon.
    #[serde(rename = "runOnce")]
    run_once: String,
    /// Only register the command; skip the immediate reboot.
    #[serde(default)]
    later: bool,
}

async fn reboot(State(state): State<InitState>, body: Bytes) -> Response {
    if !state.caps.can_reboot() {
        tracing::warn!("Reboot is not allowed");
        return (StatusCode::FORBIDDEN, "reboot is not allowed").into_response();
    }

    let body: RebootBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("Failed to decode request body: {e}");
            return (StatusCode::BAD_REQUEST, "failed to decode request body").into_response();
        }
    };

    if body.run_once.is_empty() {
        return (StatusCode::BAD_REQUEST, "runOnce is required").into_response();
    }

    if let Err(e) = ovm_win32::reboot::set_run_once(&state.opts.name, &body.run_once) {
        tracing::warn!("Failed to set runOnce to `{}`: {e}", body.run_once);
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to set runOnce").into_response();
    }

    if !body.later {
        if let Err(e) = ovm_win32::reboot::reboot() {
            tracing::warn!("Failed to reboot system: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to reboot system").into_response();
        }
    }

    StatusCode::OK.into_response()
}

async fn enable_feature(State(state): State<InitState>) -> Response {
    if !state.caps.can_enable_feature() {
        tracing::warn!("Enable feature is not allowed");
        return (StatusCode::FORBIDDEN, "enable feature is not allowed").into_response();
    }

    let ctx = ovm_wsl::install::InstallCtx {
        notifier: &state.notifier,
        caps: &state.caps,
        log_dir: &state.opts.log_path,
        name: &state.opts.name,
        is_elevated_process: false,
    };

    if let Err(e) = ovm_wsl::install::install(&ctx).await {
        tracing::warn!("Failed to enable feature: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to enable feature").into_response();
    }

    StatusCode::OK.into_response()
}

async fn update_wsl(State(state): State<InitState>) -> Response {
    if !state.caps.can_update_wsl() {
        tracing::warn!("Update WSL is not allowed");
        return (StatusCode::FORBIDDEN, "update WSL is not allowed").into_response();
    }

    let ctx = ovm_wsl::update::UpdateCtx {
        notifier: &state.notifier,
        caps: &state.caps,
        log_dir: &state.opts.log_path,
        name: &state.opts.name,
    };

    if let Err(e) = ovm_wsl::update::update(&ctx).await {
        tracing::warn!("Failed to update WSL: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to update WSL").into_response();
    }

    state.gates.wsl_updated.complete(());
    StatusCode::OK.into_response()
}

#[derive(Debug, Deserialize)]
struct FixWslConfigBody {
    method: String,
}

async fn fix_wsl_config(State(state): State<InitState>, body: Bytes) -> Response {
    if !state.caps.can_fix_wsl_config() {
        tracing::warn!("Fix WSL config is not allowed");
        return (StatusCode::FORBIDDEN, "fix WSL config is not allowed").into_response();
    }

    let body: FixWslConfigBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("Failed to decode request body: {e}");
            return (StatusCode::BAD_REQUEST, "failed to decode request body").into_response();
        }
    };

    tracing::info!(method = %body.method, "Fixing WSL config");
    let config = WslConfig::new();

    match body.method.as_str() {
        "auto" => {
            for key in INCOMPATIBLE_KEYS {
                if let Err(e) = config.comment_out_key(key) {
                    tracing::warn!("Failed to fix WSL config: {e}");
                    return (StatusCode::INTERNAL_SERVER_ERROR, "failed to fix WSL config")
                        .into_response();
                }
            }

            if let Err(e) = ovm_wsl::distro::shutdown().await {
                tracing::warn!("Failed to shutdown WSL: {e}");
            }

            state.caps.set_can_fix_wsl_config(false);
            state.gates.wsl_config_updated.complete(WslConfigFix::Auto);
        }
        "open" => {
            // Arm the follow-up shutdown before the editor opens; the
            // front-end may fire it as soon as this request returns.
            state.shutdown_armed.store(true, Ordering::SeqCst);

            if let Err(e) = config.open_in_editor() {
                tracing::warn!("Failed to open WSL config: {e}");
                return (StatusCode::INTERNAL_SERVER_ERROR, "failed to open WSL config")
                    .into_response();
            }

            state.caps.set_can_fix_wsl_config(false);
            state.gates.wsl_config_updated.complete(WslConfigFix::Open);
        }
        "skip" => {
            if let Err(e) = write_skip_marker(&state.opts.name) {
                tracing::warn!("Failed to write skip marker: {e}");
                return (StatusCode::INTERNAL_SERVER_ERROR, "failed to skip config check")
                    .into_response();
            }

            state.caps.set_can_fix_wsl_config(false);
            state.gates.wsl_config_updated.complete(WslConfigFix::Skip);
        }
        other => {
            tracing::warn!(method = other, "Unknown fix method");
            return (StatusCode::BAD_REQUEST, "unknown fix method").into_response();
        }
    }

    StatusCode::OK.into_response()
}

async fn shutdown_wsl(State(state): State<InitState>) -> Response {
    if !state.shutdown_armed.load(Ordering::SeqCst) {
        tracing::warn!("Shutdown WSL is not allowed");
        return (StatusCode::FORBIDDEN, "shutdown WSL is not allowed").into_response();
    }

    if let Err(e) = ovm_wsl::distro::shutdown().await {
        tracing::warn!("Failed to shutdown WSL: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to shutdown WSL").into_response();
    }

    state.gates.wsl_shutdown.complete(());
    state.shutdown_armed.store(false, Ordering::SeqCst);

    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> InitState {
        InitState {
            opts: BasicOpts {
                name: "test".to_string(),
                log_path: std::env::temp_dir(),
                event_pipe_name: "test-events".to_string(),
                bind_pid: 0,
            },
            caps: Arc::new(Capabilities::new()),
            gates: Arc::new(GateBus::new()),
            notifier: Notifier::disabled(ovm_core::Stage::Init),
            shutdown_armed: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn reboot_requires_run_once() {
        let state = test_state();
        state.caps.set_can_reboot(true);

        let app = init_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/reboot")
                    .body(Body::from(r#"{"runOnce": ""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reboot_rejects_malformed_body() {
        let state = test_state();
        state.caps.set_can_reboot(true);

        let app = init_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/reboot")
                    .body(Body::from("{oops"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_fix_method_is_bad_request() {
        let state = test_state();
        state.caps.set_can_fix_wsl_config(true);

        let app = init_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::PUT)
                    .uri("/fix-wsl-config")
                    .body(Body::from(r#"{"method": "wat"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
