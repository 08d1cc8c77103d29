//! Shared handles injected into the dispatcher and the inbound handler.

use crate::error::Result;
use crate::gateway::{MessagingGateway, deliver};
use crate::pending::{GracePolicy, PendingAnswerTracker};
use crate::registry::{SubjectId, SubjectRegistry};
use crate::report::{ReportRenderer, caption};
use crate::retry::RetryPolicy;
use crate::schedule::ScheduleTable;
use crate::store::{RecordStore, ReportPeriod};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Process-scoped collaborators. Cloning is cheap.
#[derive(Clone)]
pub struct HabitContext {
    pub table: Arc<ScheduleTable>,
    pub registry: Arc<dyn SubjectRegistry>,
    pub store: Arc<RecordStore>,
    pub gateway: Arc<dyn MessagingGateway>,
    pub tracker: PendingAnswerTracker,
    pub renderer: Arc<dyn ReportRenderer>,
    pub grace: GracePolicy,
    /// Policy for every outbound gateway send.
    pub send_retry: RetryPolicy,
}

impl HabitContext {
    /// Send a plain notification under the send retry policy.
    pub async fn notify(&self, subject: &SubjectId, text: &str) -> Result<()> {
        let operation = format!("notify {subject}");
        deliver(&self.send_retry, &operation, || {
            self.gateway.send_text(subject, text)
        })
        .await
    }

    /// Summarize `period`, render it and send the artifact to `subject`.
    pub async fn send_report(&self, subject: &SubjectId, period: ReportPeriod) -> Result<PathBuf> {
        let areas: Vec<String> = self.table.areas().into_iter().map(str::to_owned).collect();
        let summary = self.store.summary(subject, period, &areas).await?;
        let path = self.renderer.render_report(&summary).await?;
        let caption = caption(&summary);
        let operation = format!("send {} report to {subject}", period.label());
        deliver(&self.send_retry, &operation, || {
            self.gateway.send_document(subject, &path, &caption)
        })
        .await?;
        info!("sent {} report to {subject}", period.label());
        Ok(path)
    }
}
