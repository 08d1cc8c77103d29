//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! # Directory Layout
//!
//! | Purpose | Linux | macOS |
//! |---------|-------|-------|
//! | Data | `~/.local/share/habitual/` | `~/Library/Application Support/habitual/` |
//! | Config | `~/.config/habitual/` | `~/Library/Application Support/habitual/` |
//!
//! # Environment Overrides
//!
//! - `HABITUAL_DATA_DIR` overrides [`data_dir`]
//! - `HABITUAL_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root: record containers, registry, reports, logs.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("HABITUAL_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("habitual"))
        .unwrap_or_else(|| PathBuf::from("/tmp/habitual-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("HABITUAL_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("habitual"))
        .unwrap_or_else(|| PathBuf::from("/tmp/habitual-config"))
}

/// Per-subject record containers (`<data>/records/`).
#[must_use]
pub fn records_dir_in(data: &std::path::Path) -> PathBuf {
    data.join("records")
}

/// Rendered report artifacts (`<data>/reports/`).
#[must_use]
pub fn reports_dir_in(data: &std::path::Path) -> PathBuf {
    data.join("reports")
}

/// Log files (`<data>/logs/`).
#[must_use]
pub fn logs_dir_in(data: &std::path::Path) -> PathBuf {
    data.join("logs")
}

/// Subscribed-subject registry (`<data>/subjects.json`).
#[must_use]
pub fn registry_file_in(data: &std::path::Path) -> PathBuf {
    data.join("subjects.json")
}

/// Report dispatch ledger (`<data>/dispatch.jsonl`).
#[must_use]
pub fn dispatch_ledger_in(data: &std::path::Path) -> PathBuf {
    data.join("dispatch.jsonl")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
