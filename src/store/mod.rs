//! Per-subject record store.
//!
//! Each subject's container is owned by a dedicated actor task fed through an
//! unbounded FIFO queue, so at most one operation per subject is in flight and
//! replies are sent only after the durable commit. Different subjects proceed
//! concurrently; a shared semaphore bounds how many of them touch the disk at
//! once. An actor that stays idle retires and drops its cached container; the
//! next operation for that subject reloads it from disk.

pub mod container;
pub(crate) mod persist;
pub mod summary;

pub use container::{MAX_RECORD_VALUE, RecordContainer};
pub use summary::{AreaSummary, PeriodSummary, ReportPeriod};

use crate::error::{HabitError, Result};
use crate::registry::SubjectId;
use crate::retry::RetryPolicy;
use chrono::NaiveDate;
use persist::{read_json, write_json_atomic};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Quiet period after which a subject actor retires.
pub const DEFAULT_ACTOR_IDLE: Duration = Duration::from_secs(600);

/// Live actor queues by file stem; `None` once the store is shut down.
type QueueMap = Arc<Mutex<Option<HashMap<String, mpsc::UnboundedSender<StoreJob>>>>>;

/// Result of [`RecordStore::fill_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The default value was written.
    Filled,
    /// A record already existed; nothing was written.
    AlreadyPresent,
}

type Inspector = Box<dyn FnOnce(Result<&RecordContainer>) + Send>;

enum StoreJob {
    Write {
        date: NaiveDate,
        area: String,
        value: u8,
        only_if_absent: bool,
        reply: oneshot::Sender<Result<FillOutcome>>,
    },
    Inspect(Inspector),
}

/// Durable `(subject, date, area) -> value` store.
pub struct RecordStore {
    root: PathBuf,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    queues: QueueMap,
    idle: Duration,
    tracker: TaskTracker,
}

impl RecordStore {
    /// Store rooted at `root` (one `<subject>.json` per subject).
    pub fn new(root: impl Into<PathBuf>, retry: RetryPolicy, max_concurrent_io: usize) -> Self {
        Self {
            root: root.into(),
            retry,
            permits: Arc::new(Semaphore::new(max_concurrent_io.max(1))),
            queues: Arc::new(Mutex::new(Some(HashMap::new()))),
            idle: DEFAULT_ACTOR_IDLE,
            tracker: TaskTracker::new(),
        }
    }

    /// Override how long an actor may sit idle before it retires.
    #[must_use]
    pub fn with_actor_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Number of subjects with a live actor.
    #[must_use]
    pub fn active_subjects(&self) -> usize {
        match self.queues.lock() {
            Ok(guard) => guard.as_ref().map_or(0, HashMap::len),
            Err(poisoned) => poisoned.into_inner().as_ref().map_or(0, HashMap::len),
        }
    }

    /// Directory holding the containers.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Container path for `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`HabitError::InvalidSubject`] for ids with no file-safe characters.
    pub fn container_path(&self, subject: &SubjectId) -> Result<PathBuf> {
        Ok(self.root.join(format!("{}.json", subject.file_stem()?)))
    }

    /// Upsert a record and recompute its month aggregate.
    pub async fn write(
        &self,
        subject: &SubjectId,
        date: NaiveDate,
        area: &str,
        value: u8,
    ) -> Result<()> {
        self.submit_write(subject, date, area, value, false).await?;
        Ok(())
    }

    /// Write `value` only if no record exists, as one serialized operation.
    pub async fn fill_if_absent(
        &self,
        subject: &SubjectId,
        date: NaiveDate,
        area: &str,
        value: u8,
    ) -> Result<FillOutcome> {
        self.submit_write(subject, date, area, value, true).await
    }

    pub async fn read(&self, subject: &SubjectId, date: NaiveDate, area: &str) -> Result<Option<u8>> {
        let area = area.to_owned();
        self.inspect(subject, move |c| c.get(date, &area)).await
    }

    pub async fn exists(&self, subject: &SubjectId, date: NaiveDate, area: &str) -> Result<bool> {
        Ok(self.read(subject, date, area).await?.is_some())
    }

    /// Cached month aggregate for `area`.
    pub async fn aggregate(
        &self,
        subject: &SubjectId,
        year: i32,
        month: u32,
        area: &str,
    ) -> Result<Option<u32>> {
        let area = area.to_owned();
        self.inspect(subject, move |c| c.aggregate(year, month, &area))
            .await
    }

    /// Full copy of the subject's container.
    pub async fn snapshot(&self, subject: &SubjectId) -> Result<RecordContainer> {
        self.inspect(subject, RecordContainer::clone).await
    }

    /// Summarize `period` with one row per area.
    pub async fn summary(
        &self,
        subject: &SubjectId,
        period: ReportPeriod,
        areas: &[String],
    ) -> Result<PeriodSummary> {
        let areas = areas.to_vec();
        self.inspect(subject, move |c| {
            PeriodSummary::from_container(c, period, &areas)
        })
        .await
    }

    /// Close every queue and wait for all accepted operations to commit.
    pub async fn shutdown(&self) {
        let queues = match self.queues.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let active = queues.map(|q| q.len()).unwrap_or_default();
        self.tracker.close();
        self.tracker.wait().await;
        info!("record store drained ({active} subject queues)");
    }

    async fn submit_write(
        &self,
        subject: &SubjectId,
        date: NaiveDate,
        area: &str,
        value: u8,
        only_if_absent: bool,
    ) -> Result<FillOutcome> {
        if value > MAX_RECORD_VALUE {
            return Err(HabitError::InvalidValue {
                area: area.to_owned(),
                value,
            });
        }
        let (reply, rx) = oneshot::channel();
        self.submit(
            subject,
            StoreJob::Write {
                date,
                area: area.to_owned(),
                value,
                only_if_absent,
                reply,
            },
        )?;
        rx.await
            .map_err(|_| HabitError::Channel(format!("store actor for {subject} dropped reply")))?
    }

    async fn inspect<T, F>(&self, subject: &SubjectId, view: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RecordContainer) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = StoreJob::Inspect(Box::new(move |container: Result<&RecordContainer>| {
            let _ = tx.send(container.map(view));
        }));
        self.submit(subject, job)?;
        rx.await
            .map_err(|_| HabitError::Channel(format!("store actor for {subject} dropped reply")))?
    }

    fn submit(&self, subject: &SubjectId, job: StoreJob) -> Result<()> {
        let stem = subject.file_stem()?;
        let mut guard = self
            .queues
            .lock()
            .map_err(|_| HabitError::Channel("store queue map poisoned".into()))?;
        let queues = guard
            .as_mut()
            .ok_or_else(|| HabitError::Channel("record store is shut down".into()))?;

        let sender = queues.entry(stem.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let actor = SubjectActor {
                subject: subject.clone(),
                stem: stem.clone(),
                path: self.root.join(format!("{stem}.json")),
                retry: self.retry,
                permits: Arc::clone(&self.permits),
                queues: Arc::clone(&self.queues),
                idle: self.idle,
                cache: None,
            };
            debug!("spawning store actor for {subject}");
            self.tracker.spawn(actor.run(rx));
            tx
        });
        sender
            .send(job)
            .map_err(|_| HabitError::Channel(format!("store actor for {subject} stopped")))
    }
}

struct SubjectActor {
    subject: SubjectId,
    stem: String,
    path: PathBuf,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    queues: QueueMap,
    idle: Duration,
    cache: Option<RecordContainer>,
}

impl SubjectActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<StoreJob>) {
        loop {
            let job = match tokio::time::timeout(self.idle, rx.recv()).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(_) if self.retire(&rx) => {
                    debug!("store actor for {} retired after {:?} idle", self.subject, self.idle);
                    return;
                }
                Err(_) => continue,
            };
            match job {
                StoreJob::Write {
                    date,
                    area,
                    value,
                    only_if_absent,
                    reply,
                } => {
                    let outcome = self.apply(date, &area, value, only_if_absent).await;
                    let _ = reply.send(outcome);
                }
                StoreJob::Inspect(view) => match self.loaded().await {
                    Ok(container) => view(Ok(container)),
                    Err(e) => view(Err(e)),
                },
            }
        }
        debug!("store actor for {} stopped", self.subject);
    }

    /// Unregister this actor if nothing is queued. Submitters send while
    /// holding the same lock, so no job can slip in between.
    fn retire(&self, rx: &mpsc::UnboundedReceiver<StoreJob>) -> bool {
        let Ok(mut guard) = self.queues.lock() else {
            return false;
        };
        if !rx.is_empty() {
            return false;
        }
        if let Some(queues) = guard.as_mut() {
            queues.remove(&self.stem);
        }
        true
    }

    async fn loaded(&mut self) -> Result<&RecordContainer> {
        if self.cache.is_none() {
            let _permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| HabitError::Channel("store I/O semaphore closed".into()))?;
            let container = read_json::<RecordContainer>(&self.path)
                .await?
                .unwrap_or_else(|| RecordContainer::new(self.subject.clone()));
            self.cache = Some(container);
        }
        self.cache
            .as_ref()
            .ok_or_else(|| HabitError::Store(format!("no container for {}", self.subject)))
    }

    async fn apply(
        &mut self,
        date: NaiveDate,
        area: &str,
        value: u8,
        only_if_absent: bool,
    ) -> Result<FillOutcome> {
        let current = self.loaded().await?;
        if only_if_absent && current.contains(date, area) {
            debug!("{} {date} {area} already recorded", self.subject);
            return Ok(FillOutcome::AlreadyPresent);
        }
        let mut next = current.clone();
        next.upsert(date, area, value)?;

        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| HabitError::Channel("store I/O semaphore closed".into()))?;
        let operation = format!("commit {area} for {}", self.subject);
        match write_json_atomic(&self.path, &next, &self.retry, &operation).await {
            Ok(()) => {
                debug!("{} {date} {area}={value} committed", self.subject);
                self.cache = Some(next);
                Ok(FillOutcome::Filled)
            }
            Err(e) => {
                warn!("{operation} failed, dropping cached container: {e}");
                self.cache = None;
                Err(e)
            }
        }
    }
}
