//! Crash-safe JSON persistence: stage to a side file, fsync, rename.
//!
//! A reader never observes a half-written document: either the previous
//! file or the fully committed new one is visible at the final path.

use crate::error::{HabitError, Result};
use crate::retry::RetryPolicy;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Side location a new document is staged at before publication.
#[must_use]
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read and decode a JSON document. Returns `Ok(None)` when it does not exist.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| HabitError::Store(format!("cannot parse {}: {e}", path.display())))
}

/// Publish `bytes` at `path` in one attempt.
///
/// A missing parent directory is recreated and the publish retried once.
pub(crate) async fn publish_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    match stage_and_rename(path, bytes).await {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            stage_and_rename(path, bytes).await.map_err(HabitError::from)
        }
        other => other.map_err(HabitError::from),
    }
}

async fn stage_and_rename(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = staging_path(path);
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

/// Serialize `value` and publish it atomically under `policy`.
pub(crate) async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
    policy: &RetryPolicy,
    operation: &str,
) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| HabitError::Store(format!("cannot serialize {}: {e}", path.display())))?;
    let bytes = bytes.as_slice();
    policy
        .run(operation, move |_| publish_bytes(path, bytes))
        .await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        n: u32,
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            multiplier: 1.0,
            max_delay_ms: 1,
        }
    }

    #[test]
    fn staging_path_appends_tmp() {
        let p = staging_path(Path::new("/data/records/42.json"));
        assert_eq!(p, PathBuf::from("/data/records/42.json.tmp"));
    }

    #[tokio::test]
    async fn missing_document_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let doc: Option<Doc> = read_json(&dir.path().join("absent.json")).await.unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn write_creates_missing_directories_and_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        write_json_atomic(&path, &Doc { n: 7 }, &fast(), "write doc")
            .await
            .unwrap();
        let doc: Option<Doc> = read_json(&path).await.unwrap();
        assert_eq!(doc, Some(Doc { n: 7 }));
        assert!(!staging_path(&path).exists());
    }

    #[tokio::test]
    async fn failed_publish_keeps_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &Doc { n: 1 }, &fast(), "write doc")
            .await
            .unwrap();

        // A directory squatting on the staging path makes every stage fail.
        std::fs::create_dir(staging_path(&path)).unwrap();
        let err = write_json_atomic(&path, &Doc { n: 2 }, &fast(), "write doc")
            .await
            .unwrap_err();
        assert!(matches!(err, HabitError::RetriesExhausted { attempts: 2, .. }));

        let doc: Option<Doc> = read_json(&path).await.unwrap();
        assert_eq!(doc, Some(Doc { n: 1 }));
    }

    #[tokio::test]
    async fn corrupt_document_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_json::<Doc>(&path).await.unwrap_err();
        assert!(matches!(err, HabitError::Store(_)));
    }
}
