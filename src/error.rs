//! Error types for the habit tracker.

/// Top-level error type for scheduling, recording and dispatch.
#[derive(Debug, thiserror::Error)]
pub enum HabitError {
    /// Configuration error (malformed schedule, invalid settings).
    #[error("config error: {0}")]
    Config(String),

    /// Record container could not be interpreted.
    #[error("store error: {0}")]
    Store(String),

    /// Answer value outside the range accepted for its prompt kind.
    #[error("invalid value {value} for area `{area}`")]
    InvalidValue {
        /// Area the value was submitted for.
        area: String,
        /// Rejected value.
        value: u8,
    },

    /// Subject identifier cannot be used as a record key.
    #[error("invalid subject id `{0}`")]
    InvalidSubject(String),

    /// Area is not present in the schedule table.
    #[error("unknown area `{0}`")]
    UnknownArea(String),

    /// Subject registry storage error.
    #[error("registry error: {0}")]
    Registry(String),

    /// Messaging gateway delivery error.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Report rendering error.
    #[error("report error: {0}")]
    Report(String),

    /// Dispatcher error (ledger, tick bookkeeping).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Internal queue or channel closed.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A retried operation failed on every attempt.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Human-readable operation name.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error returned by the final attempt.
        #[source]
        source: Box<HabitError>,
    },
}

impl HabitError {
    /// Returns `true` for failures worth retrying (staging I/O, gateway sends).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Gateway(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, HabitError>;
