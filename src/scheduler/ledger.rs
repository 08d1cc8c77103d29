//! Append-only dedupe ledger for report dispatches.
//!
//! Each line is a JSON record carrying one dispatch key such as
//! `report:2026-10:42`. A key present in the ledger is never dispatched again,
//! so a repeated tick or a restart inside the boundary minute cannot send a
//! second copy.

use crate::error::{HabitError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DispatchRecord {
    key: String,
    recorded_at_ms: i64,
}

/// Dispatch-key ledger, optionally backed by a JSONL file.
pub struct DispatchLedger {
    path: Option<PathBuf>,
    seen: HashSet<String>,
}

impl DispatchLedger {
    /// Load the ledger at `path`. A missing file is an empty ledger;
    /// malformed lines are skipped.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(HabitError::Scheduler(format!(
                    "failed to read dispatch ledger {}: {e}",
                    path.display()
                )));
            }
        };
        let mut seen = HashSet::new();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<DispatchRecord>(line) {
                Ok(record) => {
                    seen.insert(record.key);
                }
                Err(e) => warn!(
                    "ignoring malformed dispatch ledger line in {}: {e}",
                    path.display()
                ),
            }
        }
        Ok(Self {
            path: Some(path),
            seen,
        })
    }

    /// Ledger that lives only for the process lifetime.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            seen: HashSet::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key.trim())
    }

    /// Record `key`. Returns `true` when newly inserted.
    pub async fn record(&mut self, key: &str) -> Result<bool> {
        let key = key.trim();
        if key.is_empty() {
            return Err(HabitError::Scheduler("dispatch key must not be empty".into()));
        }
        if self.seen.contains(key) {
            return Ok(false);
        }
        if let Some(path) = &self.path {
            append_record(path, key).await?;
        }
        self.seen.insert(key.to_owned());
        Ok(true)
    }
}

async fn append_record(path: &Path, key: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            HabitError::Scheduler(format!("failed to create dispatch ledger directory: {e}"))
        })?;
    }
    let record = DispatchRecord {
        key: key.to_owned(),
        recorded_at_ms: Utc::now().timestamp_millis(),
    };
    let mut line = serde_json::to_string(&record)
        .map_err(|e| HabitError::Scheduler(format!("failed to encode dispatch record: {e}")))?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| HabitError::Scheduler(format!("failed to open dispatch ledger: {e}")))?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| HabitError::Scheduler(format!("failed to append dispatch record: {e}")))?;
    file.sync_data()
        .await
        .map_err(|e| HabitError::Scheduler(format!("failed to sync dispatch ledger: {e}")))?;
    Ok(())
}
