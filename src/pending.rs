//! Pending-answer state machine.
//!
//! One entry per `(subject, area)` with an outstanding prompt. An entry is
//! armed when the prompt is sent and leaves the map exactly once: answered
//! (timer cancelled), timed out (auto-fill through
//! [`RecordStore::fill_if_absent`]) or superseded by a newer arm. Every entry
//! carries a generation number so a stale timer can never resolve a newer
//! entry for the same key.

use crate::gateway::{MessagingGateway, deliver};
use crate::registry::SubjectId;
use crate::retry::RetryPolicy;
use crate::schedule::{ScheduleTable, TimeOfDay};
use crate::store::{FillOutcome, RecordStore};
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Value recorded when a prompt goes unanswered.
pub const DEFAULT_ANSWER: u8 = 0;

/// How long a subject has to answer a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GracePolicy {
    /// Fixed window after the prompt.
    Fixed { secs: u64 },
    /// Until the next scheduled prompt later the same day, or midnight.
    UntilNextPrompt,
}

impl Default for GracePolicy {
    fn default() -> Self {
        Self::Fixed { secs: 1800 }
    }
}

impl GracePolicy {
    /// Window for a prompt sent at `now`.
    #[must_use]
    pub fn window_at(&self, table: &ScheduleTable, now: NaiveDateTime) -> Duration {
        match *self {
            Self::Fixed { secs } => Duration::from_secs(secs),
            Self::UntilNextPrompt => {
                let deadline = table
                    .next_after(TimeOfDay::truncate(now.time()))
                    .map(|next| now.date().and_time(next.as_naive()))
                    .or_else(|| {
                        now.date()
                            .checked_add_days(Days::new(1))
                            .map(|d| d.and_time(NaiveTime::MIN))
                    });
                deadline
                    .and_then(|deadline| (deadline - now).to_std().ok())
                    .filter(|window| !window.is_zero())
                    .unwrap_or(Duration::from_secs(60))
            }
        }
    }
}

/// An outstanding prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAnswer {
    pub subject: SubjectId,
    pub area: String,
    /// Day the prompt was sent for; the auto-fill targets this date.
    pub date: NaiveDate,
    pub armed_at: NaiveDateTime,
    pub deadline: NaiveDateTime,
}

/// Observable tracker transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingEvent {
    Armed {
        subject: SubjectId,
        area: String,
        deadline: NaiveDateTime,
    },
    Answered {
        subject: SubjectId,
        area: String,
    },
    Superseded {
        subject: SubjectId,
        area: String,
    },
    TimedOut {
        subject: SubjectId,
        area: String,
        outcome: FillOutcome,
    },
    FillFailed {
        subject: SubjectId,
        area: String,
        error: String,
    },
}

type PendingKey = (SubjectId, String);

struct PendingEntry {
    answer: PendingAnswer,
    generation: u64,
    cancel: CancellationToken,
}

struct TrackerInner {
    store: Arc<RecordStore>,
    gateway: Arc<dyn MessagingGateway>,
    send_retry: RetryPolicy,
    entries: Mutex<HashMap<PendingKey, PendingEntry>>,
    next_generation: AtomicU64,
    events: Option<mpsc::UnboundedSender<PendingEvent>>,
    timers: TaskTracker,
    shutdown: CancellationToken,
}

/// Process-scoped pending-answer tracker. Cloning shares the same state.
#[derive(Clone)]
pub struct PendingAnswerTracker {
    inner: Arc<TrackerInner>,
}

impl PendingAnswerTracker {
    pub fn new(
        store: Arc<RecordStore>,
        gateway: Arc<dyn MessagingGateway>,
        send_retry: RetryPolicy,
    ) -> Self {
        Self::build(store, gateway, send_retry, None)
    }

    /// Tracker that also publishes every transition on `events`.
    pub fn with_events(
        store: Arc<RecordStore>,
        gateway: Arc<dyn MessagingGateway>,
        send_retry: RetryPolicy,
        events: mpsc::UnboundedSender<PendingEvent>,
    ) -> Self {
        Self::build(store, gateway, send_retry, Some(events))
    }

    fn build(
        store: Arc<RecordStore>,
        gateway: Arc<dyn MessagingGateway>,
        send_retry: RetryPolicy,
        events: Option<mpsc::UnboundedSender<PendingEvent>>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                store,
                gateway,
                send_retry,
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                events,
                timers: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Arm an entry for `(subject, area)`, retiring any existing one.
    pub fn arm(
        &self,
        subject: &SubjectId,
        area: &str,
        date: NaiveDate,
        armed_at: NaiveDateTime,
        grace: Duration,
    ) {
        if self.inner.shutdown.is_cancelled() {
            warn!("tracker shut down, not arming {area} for {subject}");
            return;
        }
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.shutdown.child_token();
        let deadline = chrono::Duration::from_std(grace)
            .ok()
            .and_then(|g| armed_at.checked_add_signed(g))
            .unwrap_or(armed_at);
        let key = (subject.clone(), area.to_owned());
        let entry = PendingEntry {
            answer: PendingAnswer {
                subject: subject.clone(),
                area: area.to_owned(),
                date,
                armed_at,
                deadline,
            },
            generation,
            cancel: cancel.clone(),
        };

        let previous = self.inner.lock_entries().insert(key.clone(), entry);
        if let Some(previous) = previous {
            previous.cancel.cancel();
            debug!("superseded pending {area} for {subject}");
            self.inner.emit(PendingEvent::Superseded {
                subject: subject.clone(),
                area: area.to_owned(),
            });
        }
        self.inner.emit(PendingEvent::Armed {
            subject: subject.clone(),
            area: area.to_owned(),
            deadline,
        });

        let inner = Arc::clone(&self.inner);
        self.inner.timers.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(grace) => inner.expire(key, generation).await,
            }
        });
    }

    /// Resolve the entry because a real answer arrived. Returns the retired
    /// entry, or `None` when nothing was pending.
    pub fn resolve_answer(&self, subject: &SubjectId, area: &str) -> Option<PendingAnswer> {
        let entry = self
            .inner
            .lock_entries()
            .remove(&(subject.clone(), area.to_owned()))?;
        entry.cancel.cancel();
        self.inner.emit(PendingEvent::Answered {
            subject: subject.clone(),
            area: area.to_owned(),
        });
        Some(entry.answer)
    }

    /// Current entry for `(subject, area)`.
    #[must_use]
    pub fn pending(&self, subject: &SubjectId, area: &str) -> Option<PendingAnswer> {
        self.inner
            .lock_entries()
            .get(&(subject.clone(), area.to_owned()))
            .map(|e| e.answer.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock_entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every timer and drop all pending state.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.timers.close();
        self.inner.timers.wait().await;
        let dropped = {
            let mut entries = self.inner.lock_entries();
            let n = entries.len();
            entries.clear();
            n
        };
        info!("pending tracker stopped, {dropped} unanswered prompts dropped");
    }
}

impl TrackerInner {
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<PendingKey, PendingEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn emit(&self, event: PendingEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    async fn expire(&self, key: PendingKey, generation: u64) {
        let answer = {
            let mut entries = self.lock_entries();
            if entries.get(&key).map(|e| e.generation) == Some(generation) {
                entries.remove(&key).map(|e| e.answer)
            } else {
                None
            }
        };
        let Some(answer) = answer else {
            debug!("stale timer for {} {} ignored", key.0, key.1);
            return;
        };
        let PendingAnswer {
            subject,
            area,
            date,
            ..
        } = answer;

        match self
            .store
            .fill_if_absent(&subject, date, &area, DEFAULT_ANSWER)
            .await
        {
            Ok(FillOutcome::Filled) => {
                info!("no answer for {area} from {subject}, recorded {DEFAULT_ANSWER}");
                let text = format!(
                    "No answer for {area} on {date}; recorded {DEFAULT_ANSWER}."
                );
                let operation = format!("timeout notice to {subject}");
                if let Err(e) = deliver(&self.send_retry, &operation, || {
                    self.gateway.send_text(&subject, &text)
                })
                .await
                {
                    warn!("{operation} failed: {e}");
                }
                self.emit(PendingEvent::TimedOut {
                    subject,
                    area,
                    outcome: FillOutcome::Filled,
                });
            }
            Ok(FillOutcome::AlreadyPresent) => {
                debug!("{area} for {subject} already answered, timeout is a no-op");
                self.emit(PendingEvent::TimedOut {
                    subject,
                    area,
                    outcome: FillOutcome::AlreadyPresent,
                });
            }
            Err(e) => {
                warn!("auto-fill of {area} for {subject} failed: {e}");
                self.emit(PendingEvent::FillFailed {
                    subject,
                    area,
                    error: e.to_string(),
                });
            }
        }
    }
}
