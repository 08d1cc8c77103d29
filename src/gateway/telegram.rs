use crate::config::TelegramConfig;
use crate::gateway::{Command, InboundEvent, MessagingGateway, Prompt, parse_answer_payload};
use crate::registry::SubjectId;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An inbound event decoded from a Telegram update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramInbound {
    pub update_id: i64,
    pub event: InboundEvent,
    /// Set for button presses; the callback must be acknowledged.
    pub callback_query_id: Option<String>,
}

/// Telegram Bot API adapter.
///
/// Outbound traffic uses `sendMessage` (inline keyboards for prompts) and
/// `sendDocument`. Inbound updates arrive either through long polling
/// ([`TelegramGateway::run_polling`]) or through the webhook ingress, which
/// calls [`parse_update`] on each payload.
#[derive(Clone)]
pub struct TelegramGateway {
    bot_token: String,
    api_base_url: String,
    webhook_secret: Option<String>,
    poll_timeout_secs: u64,
    client: reqwest::Client,
}

impl TelegramGateway {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            webhook_secret: config.webhook_secret.clone(),
            poll_timeout_secs: config.poll_timeout_secs,
            client: reqwest::Client::new(),
        }
    }

    /// Expected `X-Telegram-Bot-Api-Secret-Token` header value, if any.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref().filter(|s| !s.is_empty())
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base_url, self.bot_token)
    }

    async fn call(&self, method: &str, body: &Value) -> anyhow::Result<Value> {
        if self.bot_token.trim().is_empty() {
            anyhow::bail!("telegram bot token is empty");
        }
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;
        read_result(method, response).await
    }

    /// Acknowledge a button press so the client stops its spinner. Best effort.
    pub async fn answer_callback_query(&self, callback_query_id: &str) {
        let body = json!({ "callback_query_id": callback_query_id });
        if let Err(e) = self.call("answerCallbackQuery", &body).await {
            debug!("answerCallbackQuery failed: {e}");
        }
    }

    /// Fetch updates after `offset` with long polling.
    pub async fn get_updates(&self, offset: Option<i64>) -> anyhow::Result<Vec<Value>> {
        let mut body = json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        let result = self.call("getUpdates", &body).await?;
        Ok(result.as_array().cloned().unwrap_or_default())
    }

    /// Long-poll for updates and forward decoded events until `shutdown`.
    pub async fn run_polling(
        &self,
        inbound_tx: mpsc::Sender<InboundEvent>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        info!("telegram long polling started");
        let mut offset: Option<i64> = None;
        let mut backoff_secs = 1u64;
        loop {
            let batch = tokio::select! {
                () = shutdown.cancelled() => break,
                batch = self.get_updates(offset) => batch,
            };
            match batch {
                Ok(updates) => {
                    backoff_secs = 1;
                    for update in updates {
                        if let Some(id) = update.get("update_id").and_then(Value::as_i64) {
                            offset = Some(id + 1);
                        }
                        let Some(inbound) = parse_update(&update) else {
                            continue;
                        };
                        if let Some(id) = &inbound.callback_query_id {
                            self.answer_callback_query(id).await;
                        }
                        if inbound_tx.send(inbound.event).await.is_err() {
                            info!("inbound queue closed, telegram polling stopped");
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    warn!("telegram getUpdates failed: {e}; retrying in {backoff_secs}s");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                    }
                    backoff_secs = backoff_secs.saturating_mul(2).min(60);
                }
            }
        }
        info!("telegram long polling stopped");
        Ok(())
    }
}

async fn read_result(method: &str, response: reqwest::Response) -> anyhow::Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("telegram {method} failed ({status}): {body}");
    }
    let payload: Value = response.json().await?;
    if payload.get("ok").and_then(Value::as_bool) != Some(true) {
        let description = payload
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        anyhow::bail!("telegram {method} rejected: {description}");
    }
    Ok(payload.get("result").cloned().unwrap_or(Value::Null))
}

/// Numeric chat ids are sent as numbers, anything else (e.g. `@channel`) as text.
fn chat_id(subject: &SubjectId) -> Value {
    subject
        .as_str()
        .parse::<i64>()
        .map_or_else(|_| json!(subject.as_str()), |id| json!(id))
}

fn inline_keyboard(prompt: &Prompt) -> Value {
    let rows: Vec<Value> = prompt
        .choices
        .iter()
        .map(|row| {
            row.iter()
                .map(|c| json!({ "text": c.label, "callback_data": c.payload }))
                .collect::<Vec<_>>()
                .into()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

/// Decode one Bot API update into an inbound event.
///
/// Button presses become answers; `/start`, `/stop`, `/report` and `/help`
/// messages become commands. Anything else is ignored.
#[must_use]
pub fn parse_update(update: &Value) -> Option<TelegramInbound> {
    let update_id = update.get("update_id").and_then(Value::as_i64).unwrap_or_default();

    if let Some(callback) = update.get("callback_query") {
        let from = callback.get("from")?.get("id")?.as_i64()?;
        let data = callback.get("data")?.as_str()?;
        let (area, value) = parse_answer_payload(data)?;
        return Some(TelegramInbound {
            update_id,
            event: InboundEvent::Answer {
                subject: SubjectId::from(from),
                area,
                value,
            },
            callback_query_id: callback
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_owned),
        });
    }

    let message = update.get("message")?;
    let from = message.get("from")?.get("id")?.as_i64()?;
    let text = message.get("text")?.as_str()?.trim();
    if !text.starts_with('/') {
        return None;
    }
    let command = Command::parse(text)?;
    Some(TelegramInbound {
        update_id,
        event: InboundEvent::Command {
            subject: SubjectId::from(from),
            command,
        },
        callback_query_id: None,
    })
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    fn id(&self) -> &'static str {
        "telegram"
    }

    async fn send_prompt(&self, subject: &SubjectId, prompt: &Prompt) -> anyhow::Result<()> {
        let body = json!({
            "chat_id": chat_id(subject),
            "text": prompt.text,
            "reply_markup": inline_keyboard(prompt),
        });
        self.call("sendMessage", &body).await?;
        Ok(())
    }

    async fn send_text(&self, subject: &SubjectId, text: &str) -> anyhow::Result<()> {
        let body = json!({
            "chat_id": chat_id(subject),
            "text": text,
        });
        self.call("sendMessage", &body).await?;
        Ok(())
    }

    async fn send_document(
        &self,
        subject: &SubjectId,
        path: &Path,
        caption: &str,
    ) -> anyhow::Result<()> {
        if self.bot_token.trim().is_empty() {
            anyhow::bail!("telegram bot token is empty");
        }
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report.json".to_owned());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("chat_id", subject.as_str().to_owned())
            .text("caption", caption.to_owned())
            .part("document", part);

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;
        read_result("sendDocument", response).await?;
        Ok(())
    }
}
