//! Configuration types for the habit tracker.

use crate::error::{HabitError, Result};
use crate::habit_dirs;
use crate::pending::GracePolicy;
use crate::retry::RetryPolicy;
use crate::schedule::{ScheduleEntry, ScheduleTable, TimeOfDay, default_entries};
use crate::scheduler::{DEFAULT_TICK_SECS, ReportSchedule};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HabitConfig {
    /// Scheduled questions.
    pub schedule: ScheduleConfig,
    /// Record store settings.
    pub store: StoreConfig,
    /// Answer grace window.
    pub pending: PendingConfig,
    /// Tick loop and report boundaries.
    pub dispatcher: DispatcherConfig,
    /// Outbound transport and HTTP ingress.
    pub gateway: GatewayConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Schedule table configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub entries: Vec<ScheduleEntry>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            entries: default_entries(),
        }
    }
}

impl ScheduleConfig {
    /// Build the validated, time-ordered table.
    ///
    /// # Errors
    ///
    /// Returns [`HabitError::Config`] for empty areas or questions and
    /// duplicate `(time, area)` pairs.
    pub fn table(&self) -> Result<ScheduleTable> {
        ScheduleTable::new(self.entries.clone())
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Data root (None = platform data dir or `HABITUAL_DATA_DIR`).
    pub data_dir: Option<PathBuf>,
    /// Maximum number of subjects touching disk at once.
    pub max_concurrent_io: usize,
    /// Retry policy for durable writes.
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_concurrent_io: 8,
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Effective data root.
    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(habit_dirs::data_dir)
    }
}

/// Pending-answer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingConfig {
    pub grace: GracePolicy,
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Seconds between ticks.
    pub tick_secs: u64,
    /// Minute of the last day of the month the monthly report is sent.
    pub report_time: TimeOfDay,
    /// Send a weekly report as well.
    pub weekly_report: bool,
    /// Day of the weekly report.
    pub weekly_day: Weekday,
    /// Minute of the weekly report.
    pub weekly_time: TimeOfDay,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            report_time: TimeOfDay::from_hm(23, 59).unwrap_or_default(),
            weekly_report: true,
            weekly_day: Weekday::Sat,
            weekly_time: TimeOfDay::from_hm(23, 59).unwrap_or_default(),
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub fn report_schedule(&self) -> ReportSchedule {
        ReportSchedule {
            monthly_time: self.report_time,
            weekly: self
                .weekly_report
                .then_some((self.weekly_day, self.weekly_time)),
        }
    }
}

/// How Telegram updates reach the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelegramMode {
    /// `getUpdates` long polling.
    #[default]
    Polling,
    /// Updates pushed to `POST /telegram` on the webhook ingress.
    Webhook,
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token. `HABITUAL_TELEGRAM_TOKEN` takes precedence.
    pub bot_token: String,
    /// API root, overridable for tests and proxies.
    pub api_base_url: String,
    pub mode: TelegramMode,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` on webhook calls.
    pub webhook_secret: Option<String>,
    /// Long-poll timeout in seconds.
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: "https://api.telegram.org".to_owned(),
            mode: TelegramMode::Polling,
            webhook_secret: None,
            poll_timeout_secs: 30,
        }
    }
}

/// HTTP ingress settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Bearer token required on `/answer` and `/command` when set.
    pub bearer_token: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_owned(),
            port: 8088,
            bearer_token: None,
        }
    }
}

/// Messaging gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Telegram transport (None = record outbound messages in memory only).
    pub telegram: Option<TelegramConfig>,
    pub webhook: WebhookConfig,
    /// Retry policy for outbound sends.
    pub send_retry: RetryPolicy,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Also write daily-rotated files under `<data>/logs/`.
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            file: false,
        }
    }
}

impl HabitConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| HabitError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| HabitError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/habitual/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if std::env::var_os("HABITUAL_CONFIG_DIR").is_some() {
            return habit_dirs::config_file();
        }
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("habitual").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("habitual")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/habitual-config/config.toml")
        }
    }

    /// Apply environment overrides (`HABITUAL_TELEGRAM_TOKEN`).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("HABITUAL_TELEGRAM_TOKEN")
            && !token.trim().is_empty()
        {
            self.gateway
                .telegram
                .get_or_insert_with(TelegramConfig::default)
                .bot_token = token.trim().to_owned();
        }
    }

    /// Check cross-field constraints. Fatal at startup only.
    ///
    /// # Errors
    ///
    /// Returns [`HabitError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let table = self.schedule.table()?;
        if self.dispatcher.tick_secs == 0 {
            return Err(HabitError::Config("dispatcher.tick_secs must be > 0".into()));
        }
        if self.dispatcher.tick_secs > 60 {
            return Err(HabitError::Config(
                "dispatcher.tick_secs must be <= 60".into(),
            ));
        }
        // A report covering today must wait for today's last prompt.
        if let Some(last_prompt) = table.entries().iter().map(|e| e.time).max() {
            if self.dispatcher.report_time <= last_prompt {
                return Err(HabitError::Config(format!(
                    "dispatcher.report_time must be after the last prompt ({last_prompt})"
                )));
            }
            if self.dispatcher.weekly_report
                && self.dispatcher.weekly_day == Weekday::Sat
                && self.dispatcher.weekly_time <= last_prompt
            {
                return Err(HabitError::Config(format!(
                    "dispatcher.weekly_time on Saturday must be after the last prompt ({last_prompt})"
                )));
            }
        }
        if self.store.max_concurrent_io == 0 {
            return Err(HabitError::Config("store.max_concurrent_io must be > 0".into()));
        }
        for (name, policy) in [
            ("store.retry", &self.store.retry),
            ("gateway.send_retry", &self.gateway.send_retry),
        ] {
            if policy.max_attempts == 0 {
                return Err(HabitError::Config(format!("{name}.max_attempts must be >= 1")));
            }
        }
        if let GracePolicy::Fixed { secs: 0 } = self.pending.grace {
            return Err(HabitError::Config("pending.grace.secs must be > 0".into()));
        }
        if let Some(telegram) = &self.gateway.telegram {
            if telegram.bot_token.trim().is_empty() {
                return Err(HabitError::Config(
                    "gateway.telegram.bot_token is empty (set HABITUAL_TELEGRAM_TOKEN)".into(),
                ));
            }
            if telegram.mode == TelegramMode::Webhook && !self.gateway.webhook.enabled {
                return Err(HabitError::Config(
                    "telegram webhook mode requires gateway.webhook.enabled".into(),
                ));
            }
        }
        Ok(())
    }
}
