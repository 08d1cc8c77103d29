//! Report artifacts for period summaries.

use crate::error::{HabitError, Result};
use crate::retry::RetryPolicy;
use crate::store::persist::write_json_atomic;
use crate::store::{PeriodSummary, ReportPeriod};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Turns a [`PeriodSummary`] into a file that can be sent to the subject.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// Render `summary` and return the artifact path.
    async fn render_report(&self, summary: &PeriodSummary) -> Result<PathBuf>;
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    summary: &'a PeriodSummary,
}

/// Writes `report_<subject>_<period>.json` into a reports directory.
pub struct JsonReportRenderer {
    dir: PathBuf,
    retry: RetryPolicy,
}

impl JsonReportRenderer {
    pub fn new(dir: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            dir: dir.into(),
            retry,
        }
    }

    /// Artifact path for `summary`.
    pub fn report_path(&self, summary: &PeriodSummary) -> Result<PathBuf> {
        let stem = summary.subject.file_stem()?;
        Ok(self
            .dir
            .join(format!("report_{stem}_{}.json", summary.period.label())))
    }
}

#[async_trait]
impl ReportRenderer for JsonReportRenderer {
    async fn render_report(&self, summary: &PeriodSummary) -> Result<PathBuf> {
        let path = self.report_path(summary)?;
        let doc = ReportDocument {
            generated_at: Utc::now(),
            summary,
        };
        let operation = format!("render report {}", path.display());
        write_json_atomic(&path, &doc, &self.retry, &operation)
            .await
            .map_err(|e| HabitError::Report(e.to_string()))?;
        Ok(path)
    }
}

/// Human-readable title of a report period.
#[must_use]
pub fn period_title(period: &ReportPeriod) -> String {
    match period {
        ReportPeriod::Month { .. } => format!("Monthly report {}", period.label()),
        ReportPeriod::Week { .. } => format!(
            "Weekly report {} to {}",
            period.first_day().format("%Y-%m-%d"),
            period.last_day().format("%Y-%m-%d")
        ),
    }
}

/// Short text rendering used as the document caption.
#[must_use]
pub fn caption(summary: &PeriodSummary) -> String {
    let mut out = period_title(&summary.period);
    for row in &summary.areas {
        let _ = write!(
            out,
            "\n{}: {} ({}/{} days)",
            row.area, row.score, row.answered_days, summary.days_in_period
        );
    }
    out
}
