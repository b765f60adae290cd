use crate::chat::{ChatService, InboundChat};
use crate::commands::{CommandRequest, CommandService};
use crate::config::GatewayConfig;
use crate::scheduler::runner::Clock;
use crate::scheduler::store::{self, SharedStore};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared handles for the HTTP gateway.
#[derive(Clone)]
pub struct GatewayState {
    pub commands: CommandService,
    pub chat: Arc<ChatService>,
    pub store: SharedStore,
    pub clock: Arc<dyn Clock>,
    pub bearer_token: Option<String>,
}

/// Routes: liveness, health, commands and chat messages.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(alive))
        .route("/health", get(gateway_health))
        .route("/commands", post(run_command))
        .route("/messages", post(chat_message))
        .with_state(state)
}

/// Serve the gateway until `cancel` fires.
pub async fn run_gateway(
    config: &GatewayConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!("gateway listening on http://{local_addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// Periodically GET `url` so free-tier hosts keep the process awake.
pub fn spawn_keepalive(
    url: String,
    every: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            match client.get(&url).send().await {
                Ok(resp) => tracing::debug!(status = %resp.status(), "keepalive ping"),
                Err(e) => tracing::warn!(error = %e, "keepalive ping failed"),
            }
        }
    })
}

async fn alive() -> &'static str {
    "Nikki bot is alive!"
}

async fn gateway_health(State(state): State<GatewayState>) -> impl IntoResponse {
    match store::lock(&state.store) {
        Ok(store) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "reminders": store.len(),
                "persist_failures": store.persist_failures()
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "degraded", "error": e.to_string()})),
        ),
    }
}

fn bearer_is_valid(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected_token) = expected else {
        return true;
    };
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let candidate = header_value
        .strip_prefix("Bearer ")
        .unwrap_or_default()
        .trim();
    !expected_token.is_empty() && candidate == expected_token
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "unauthorized"})),
    )
}

fn internal(e: &crate::BotError) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!(error = %e, "gateway request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": e.to_string()})),
    )
}

async fn run_command(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(request): Json<CommandRequest>,
) -> impl IntoResponse {
    if !bearer_is_valid(&headers, state.bearer_token.as_deref()) {
        return unauthorized();
    }
    match state.commands.execute(request, state.clock.now()) {
        Ok(reply) => (
            StatusCode::OK,
            Json(serde_json::to_value(reply).unwrap_or_default()),
        ),
        Err(e) => internal(&e),
    }
}

async fn chat_message(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(message): Json<InboundChat>,
) -> impl IntoResponse {
    if !bearer_is_valid(&headers, state.bearer_token.as_deref()) {
        return unauthorized();
    }
    if message.user_id.trim().is_empty() || message.channel_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "user_id and channel_id are required"})),
        );
    }
    match state.chat.handle(&message, state.clock.now()).await {
        Ok(Some(reply)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "replied": true,
                "answered": reply.answered,
                "chunks": reply.chunks
            })),
        ),
        Ok(None) => (
            StatusCode::OK,
            Json(serde_json::json!({"replied": false, "chunks": []})),
        ),
        Err(e) => internal(&e),
    }
}
