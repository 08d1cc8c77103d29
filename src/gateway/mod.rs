//! Messaging gateway contract and transport adapters.
//!
//! The core never speaks a chat protocol. Outbound traffic goes
//! through [`MessagingGateway`]; inbound traffic is translated by adapters
//! into [`InboundEvent`]s and pushed onto an mpsc channel consumed by the
//! inbound handler.

pub mod memory;
pub mod telegram;
pub mod webhook;

use crate::error::{HabitError, Result};
use crate::registry::SubjectId;
use crate::retry::RetryPolicy;
use crate::schedule::PromptKind;
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;

/// One selectable answer button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    /// Button label shown to the subject.
    pub label: String,
    /// Opaque payload echoed back by the transport (see [`parse_answer_payload`]).
    pub payload: String,
}

/// A rendered scheduled question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Area the prompt asks about.
    pub area: String,
    /// Message body.
    pub text: String,
    /// Choice rows.
    pub choices: Vec<Vec<Choice>>,
}

/// Outbound messaging contract. New transports only need to implement this trait.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Stable transport identifier (e.g. `telegram`).
    fn id(&self) -> &'static str;

    /// Deliver a scheduled question with its answer choices.
    async fn send_prompt(&self, subject: &SubjectId, prompt: &Prompt) -> anyhow::Result<()>;

    /// Deliver a plain notification.
    async fn send_text(&self, subject: &SubjectId, text: &str) -> anyhow::Result<()>;

    /// Deliver a file artifact with a caption.
    async fn send_document(
        &self,
        subject: &SubjectId,
        path: &Path,
        caption: &str,
    ) -> anyhow::Result<()>;
}

/// Run one outbound send under `policy`, mapping adapter errors to
/// [`HabitError::Gateway`] so they count as transient.
pub async fn deliver<F, Fut>(policy: &RetryPolicy, operation: &str, mut send: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    policy
        .run(operation, |_| {
            let fut = send();
            async move { fut.await.map_err(|e| HabitError::Gateway(format!("{e:#}"))) }
        })
        .await
}

/// Subject commands understood by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Subscribe to daily prompts.
    Start,
    /// Unsubscribe.
    Stop,
    /// Send the current month's report now.
    Report,
    /// Show usage.
    Help,
}

impl Command {
    /// Parse `/start`, `START`, `/stop@botname` and friends.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let word = word.strip_prefix('/').unwrap_or(word);
        let word = word.split('@').next().unwrap_or(word);
        match word.to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "report" => Some(Self::Report),
            "help" => Some(Self::Help),
            _ => None,
        }
    }
}

/// Transport-agnostic inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A subject answered a prompt.
    Answer {
        subject: SubjectId,
        area: String,
        value: u8,
    },
    /// A subject issued a command.
    Command {
        subject: SubjectId,
        command: Command,
    },
}

impl InboundEvent {
    /// Subject the event came from.
    #[must_use]
    pub fn subject(&self) -> &SubjectId {
        match self {
            Self::Answer { subject, .. } | Self::Command { subject, .. } => subject,
        }
    }
}

/// Encode the payload carried by an answer button.
#[must_use]
pub fn answer_payload(kind: PromptKind, area: &str, value: u8) -> String {
    match kind {
        PromptKind::Binary if value >= 1 => format!("yes:{area}"),
        PromptKind::Binary => format!("no:{area}"),
        PromptKind::Scale => format!("scale:{area}:{value}"),
    }
}

/// Decode an answer button payload into `(area, value)`.
///
/// Areas may contain `:`; the scale value is always the last segment.
#[must_use]
pub fn parse_answer_payload(payload: &str) -> Option<(String, u8)> {
    let (tag, rest) = payload.split_once(':')?;
    let (area, value) = match tag {
        "yes" => (rest, 1),
        "no" => (rest, 0),
        "scale" => {
            let (area, raw) = rest.rsplit_once(':')?;
            (area, raw.parse::<u8>().ok()?)
        }
        _ => return None,
    };
    if area.trim().is_empty() {
        return None;
    }
    Some((area.to_owned(), value))
}
