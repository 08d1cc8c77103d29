//! In-memory gateway that records every outbound message.
//!
//! Used by tests and by dry runs; failures and latency can be injected per
//! subject to exercise the dispatcher's isolation and retry paths.

use crate::gateway::{MessagingGateway, Prompt};
use crate::registry::SubjectId;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// A message captured by [`MemoryGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Prompt { subject: SubjectId, prompt: Prompt },
    Text { subject: SubjectId, text: String },
    Document {
        subject: SubjectId,
        path: PathBuf,
        caption: String,
    },
}

impl SentMessage {
    /// Recipient of the message.
    #[must_use]
    pub fn subject(&self) -> &SubjectId {
        match self {
            Self::Prompt { subject, .. }
            | Self::Text { subject, .. }
            | Self::Document { subject, .. } => subject,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    sent: Vec<SentMessage>,
    failing: HashSet<SubjectId>,
    delays: HashMap<SubjectId, Duration>,
    attempts: usize,
}

/// Recording gateway.
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `subject` fail until [`MemoryGateway::heal`] is called.
    pub fn fail_for(&self, subject: &SubjectId) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.insert(subject.clone());
        }
    }

    /// Stop injecting failures for `subject`.
    pub fn heal(&self, subject: &SubjectId) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.remove(subject);
        }
    }

    /// Hold every send to `subject` for `delay` before it completes.
    pub fn delay_for(&self, subject: &SubjectId, delay: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.delays.insert(subject.clone(), delay);
        }
    }

    /// Snapshot of all delivered messages, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().map(|s| s.sent.clone()).unwrap_or_default()
    }

    /// Delivered messages addressed to `subject`.
    #[must_use]
    pub fn sent_to(&self, subject: &SubjectId) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.subject() == subject)
            .collect()
    }

    /// Number of send attempts, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.lock().map(|s| s.attempts).unwrap_or_default()
    }

    async fn deliver(&self, message: SentMessage) -> anyhow::Result<()> {
        let delay = self
            .state
            .lock()
            .ok()
            .and_then(|s| s.delays.get(message.subject()).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory gateway state poisoned"))?;
        state.attempts += 1;
        if state.failing.contains(message.subject()) {
            anyhow::bail!("injected delivery failure for {}", message.subject());
        }
        state.sent.push(message);
        Ok(())
    }
}

#[async_trait]
impl MessagingGateway for MemoryGateway {
    fn id(&self) -> &'static str {
        "memory"
    }

    async fn send_prompt(&self, subject: &SubjectId, prompt: &Prompt) -> anyhow::Result<()> {
        self.deliver(SentMessage::Prompt {
            subject: subject.clone(),
            prompt: prompt.clone(),
        })
        .await
    }

    async fn send_text(&self, subject: &SubjectId, text: &str) -> anyhow::Result<()> {
        self.deliver(SentMessage::Text {
            subject: subject.clone(),
            text: text.to_owned(),
        })
        .await
    }

    async fn send_document(
        &self,
        subject: &SubjectId,
        path: &Path,
        caption: &str,
    ) -> anyhow::Result<()> {
        self.deliver(SentMessage::Document {
            subject: subject.clone(),
            path: path.to_path_buf(),
            caption: caption.to_owned(),
        })
        .await
    }
}
