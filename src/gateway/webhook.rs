//! HTTP ingress: Telegram webhook updates and a generic JSON API, all
//! forwarded as [`InboundEvent`]s to the inbound queue.

use crate::gateway::telegram::{TelegramGateway, parse_update};
use crate::gateway::{Command, InboundEvent};
use crate::registry::SubjectId;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Header Telegram uses to echo the webhook secret.
pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct WebhookState {
    inbound_tx: mpsc::Sender<InboundEvent>,
    bearer_token: Option<String>,
    telegram: Option<Arc<TelegramGateway>>,
}

impl WebhookState {
    pub fn new(
        inbound_tx: mpsc::Sender<InboundEvent>,
        bearer_token: Option<String>,
        telegram: Option<Arc<TelegramGateway>>,
    ) -> Self {
        Self {
            inbound_tx,
            bearer_token: bearer_token.filter(|t| !t.trim().is_empty()),
            telegram,
        }
    }
}

#[derive(Deserialize)]
struct AnswerBody {
    subject: String,
    area: String,
    value: u8,
}

#[derive(Deserialize)]
struct CommandBody {
    subject: String,
    command: Command,
}

/// Routes: `GET /health`, `POST /telegram`, `POST /answer`, `POST /command`.
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/telegram", post(telegram_update))
        .route("/answer", post(answer))
        .route("/command", post(command))
        .with_state(state)
}

/// Serve the ingress on `listener` until `shutdown` is cancelled.
pub async fn serve_webhook(
    listener: TcpListener,
    state: WebhookState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    tracing::info!("webhook ingress listening on http://{local_addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("webhook ingress stopped");
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn bearer_is_valid(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected_token) = expected else {
        return true;
    };
    let candidate = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .trim();
    !expected_token.is_empty() && candidate == expected_token
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized" })),
    )
}

async fn enqueue(state: &WebhookState, event: InboundEvent) -> (StatusCode, Json<serde_json::Value>) {
    if state.inbound_tx.send(event).await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "inbound handler unavailable" })),
        );
    }
    (StatusCode::OK, Json(json!({ "queued": true })))
}

async fn telegram_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(update): Json<serde_json::Value>,
) -> impl IntoResponse {
    let Some(telegram) = state.telegram.clone() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "telegram not configured" })),
        );
    };
    if let Some(secret) = telegram.webhook_secret() {
        let presented = headers
            .get(TELEGRAM_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if presented != secret {
            return unauthorized();
        }
    }

    // Unsupported updates are acknowledged so Telegram stops redelivering them.
    let Some(inbound) = parse_update(&update) else {
        return (StatusCode::OK, Json(json!({ "queued": false })));
    };
    if let Some(id) = &inbound.callback_query_id {
        telegram.answer_callback_query(id).await;
    }
    enqueue(&state, inbound.event).await
}

async fn answer(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(body): Json<AnswerBody>,
) -> impl IntoResponse {
    if !bearer_is_valid(&headers, &state.bearer_token) {
        return unauthorized();
    }
    let subject = body.subject.trim();
    let area = body.area.trim();
    if subject.is_empty() || area.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "subject and area are required" })),
        );
    }
    let event = InboundEvent::Answer {
        subject: SubjectId::from(subject),
        area: area.to_owned(),
        value: body.value,
    };
    enqueue(&state, event).await
}

async fn command(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(body): Json<CommandBody>,
) -> impl IntoResponse {
    if !bearer_is_valid(&headers, &state.bearer_token) {
        return unauthorized();
    }
    let subject = body.subject.trim();
    if subject.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "subject is required" })),
        );
    }
    let event = InboundEvent::Command {
        subject: SubjectId::from(subject),
        command: body.command,
    };
    enqueue(&state, event).await
}
