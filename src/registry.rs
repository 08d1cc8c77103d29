//! Subject identity and the registry of subscribed subjects.
//!
//! The registry is read-mostly: the dispatcher lists subjects once per
//! matching tick, while register/unregister arrive through inbound commands.
//! Mutations are serialized behind the registry's own async mutex,
//! independently of record writes.

use crate::error::{HabitError, Result};
use crate::retry::RetryPolicy;
use crate::store::persist::{read_json, write_json_atomic};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

/// Opaque, stable subject identifier (chat or account id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-name-safe form of the id: only `[A-Za-z0-9_-]` survive.
    ///
    /// # Errors
    ///
    /// Returns [`HabitError::InvalidSubject`] when nothing survives.
    pub fn file_stem(&self) -> Result<String> {
        let stem: String = self
            .0
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if stem.is_empty() {
            return Err(HabitError::InvalidSubject(self.0.clone()));
        }
        Ok(stem)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for SubjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for SubjectId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

/// Durable set of subscribed subjects.
#[async_trait]
pub trait SubjectRegistry: Send + Sync {
    /// Add a subject. Returns `true` when newly added.
    async fn register(&self, subject: &SubjectId) -> Result<bool>;

    /// Remove a subject. Returns `true` when it was present.
    async fn unregister(&self, subject: &SubjectId) -> Result<bool>;

    /// All subscribed subjects in stable order.
    async fn list_all(&self) -> Result<Vec<SubjectId>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default = "default_registry_version")]
    version: u8,
    #[serde(default)]
    subjects: BTreeSet<SubjectId>,
}

fn default_registry_version() -> u8 {
    1
}

/// Registry persisted as one JSON document with atomic replacement.
pub struct FileSubjectRegistry {
    path: PathBuf,
    retry: RetryPolicy,
    subjects: Mutex<BTreeSet<SubjectId>>,
}

impl FileSubjectRegistry {
    /// Load the registry at `path`; a missing file is an empty registry.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>, retry: RetryPolicy) -> Result<Self> {
        let path = path.into();
        let doc: RegistryDocument = read_json(&path)
            .await
            .map_err(|e| HabitError::Registry(e.to_string()))?
            .unwrap_or_default();
        info!(
            "loaded {} subscribed subjects from {}",
            doc.subjects.len(),
            path.display()
        );
        Ok(Self {
            path,
            retry,
            subjects: Mutex::new(doc.subjects),
        })
    }

    /// Location of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, subjects: &BTreeSet<SubjectId>) -> Result<()> {
        let doc = RegistryDocument {
            version: default_registry_version(),
            subjects: subjects.clone(),
        };
        write_json_atomic(&self.path, &doc, &self.retry, "persist subject registry").await
    }
}

#[async_trait]
impl SubjectRegistry for FileSubjectRegistry {
    async fn register(&self, subject: &SubjectId) -> Result<bool> {
        let mut subjects = self.subjects.lock().await;
        if subjects.contains(subject) {
            return Ok(false);
        }
        let mut next = subjects.clone();
        next.insert(subject.clone());
        self.persist(&next).await?;
        *subjects = next;
        info!("subject {subject} registered");
        Ok(true)
    }

    async fn unregister(&self, subject: &SubjectId) -> Result<bool> {
        let mut subjects = self.subjects.lock().await;
        if !subjects.contains(subject) {
            return Ok(false);
        }
        let mut next = subjects.clone();
        next.remove(subject);
        self.persist(&next).await?;
        *subjects = next;
        info!("subject {subject} unregistered");
        Ok(true)
    }

    async fn list_all(&self) -> Result<Vec<SubjectId>> {
        Ok(self.subjects.lock().await.iter().cloned().collect())
    }
}

/// Volatile registry for tests and dry runs.
#[derive(Default)]
pub struct MemorySubjectRegistry {
    subjects: Mutex<BTreeSet<SubjectId>>,
}

impl MemorySubjectRegistry {
    pub fn with_subjects(subjects: impl IntoIterator<Item = SubjectId>) -> Self {
        Self {
            subjects: Mutex::new(subjects.into_iter().collect()),
        }
    }
}

#[async_trait]
impl SubjectRegistry for MemorySubjectRegistry {
    async fn register(&self, subject: &SubjectId) -> Result<bool> {
        Ok(self.subjects.lock().await.insert(subject.clone()))
    }

    async fn unregister(&self, subject: &SubjectId) -> Result<bool> {
        Ok(self.subjects.lock().await.remove(subject))
    }

    async fn list_all(&self) -> Result<Vec<SubjectId>> {
        Ok(self.subjects.lock().await.iter().cloned().collect())
    }
}
