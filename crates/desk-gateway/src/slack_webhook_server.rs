use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use desk_slack_runtime::{SlackInboundRuntime, WebhookDisposition};
use serde_json::json;
use tokio::net::TcpListener;

pub const SLACK_WEBHOOK_ENDPOINT: &str = "/api/slack/webhook";
pub const HEALTH_ENDPOINT: &str = "/healthz";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `GatewayServerConfig` used by the daemon.
pub struct GatewayServerConfig {
    pub bind: String,
}

#[derive(Clone)]
struct GatewayServerState {
    runtime: Arc<SlackInboundRuntime>,
}

/// Serves the webhook gateway until ctrl-c.
pub async fn run_gateway_server(
    config: GatewayServerConfig,
    runtime: Arc<SlackInboundRuntime>,
) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --gateway-bind '{}'", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway server address")?;

    tracing::info!(
        endpoint = SLACK_WEBHOOK_ENDPOINT,
        addr = %local_addr,
        state_dir = %runtime.state_dir().display(),
        "gateway server listening"
    );

    let app = build_gateway_router(runtime);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("gateway server exited unexpectedly")?;
    tracing::info!("gateway server shut down");
    Ok(())
}

pub fn build_gateway_router(runtime: Arc<SlackInboundRuntime>) -> Router {
    Router::new()
        .route(SLACK_WEBHOOK_ENDPOINT, post(handle_slack_webhook))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(Arc::new(GatewayServerState { runtime }))
}

async fn handle_health() -> Response {
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

async fn handle_slack_webhook(
    State(state): State<Arc<GatewayServerState>>,
    body: Bytes,
) -> Response {
    let raw = String::from_utf8_lossy(&body);
    let disposition = state.runtime.handle_webhook_body(&raw).await;
    tracing::debug!(disposition = disposition.as_str(), "handled slack webhook");
    match disposition {
        WebhookDisposition::Challenge { challenge } => {
            (StatusCode::OK, Json(json!({ "challenge": challenge }))).into_response()
        }
        // Slack retries non-2xx answers, so every other outcome is acknowledged.
        _ => (StatusCode::OK, Json(json!({"ok": true}))).into_response(),
    }
}
