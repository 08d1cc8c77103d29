//! Shared helpers for integration tests.

use chrono::{NaiveDate, NaiveDateTime, Weekday};
use habitual::context::HabitContext;
use habitual::gateway::memory::MemoryGateway;
use habitual::pending::{GracePolicy, PendingAnswerTracker, PendingEvent};
use habitual::registry::{MemorySubjectRegistry, SubjectId};
use habitual::report::JsonReportRenderer;
use habitual::retry::RetryPolicy;
use habitual::schedule::{ScheduleEntry, ScheduleTable, default_entries};
use habitual::scheduler::ReportSchedule;
use habitual::store::RecordStore;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Wired collaborators over a temp dir and an in-memory gateway.
pub(crate) struct Harness {
    pub dir: tempfile::TempDir,
    pub gateway: Arc<MemoryGateway>,
    pub ctx: HabitContext,
    pub events: mpsc::UnboundedReceiver<PendingEvent>,
}

pub(crate) fn harness(subjects: &[&str]) -> Harness {
    let dir = tempfile::tempdir().expect("create temp dir");
    harness_in(dir, subjects)
}

/// Build a harness over an existing directory, e.g. to simulate a restart.
pub(crate) fn harness_in(dir: tempfile::TempDir, subjects: &[&str]) -> Harness {
    build(dir, default_entries(), subjects)
}

/// Harness over a custom schedule.
pub(crate) fn harness_with(entries: Vec<ScheduleEntry>, subjects: &[&str]) -> Harness {
    let dir = tempfile::tempdir().expect("create temp dir");
    build(dir, entries, subjects)
}

fn build(dir: tempfile::TempDir, entries: Vec<ScheduleEntry>, subjects: &[&str]) -> Harness {
    let store = Arc::new(RecordStore::new(
        dir.path().join("records"),
        RetryPolicy::no_retry(),
        4,
    ));
    let gateway = Arc::new(MemoryGateway::new());
    let (tx, events) = mpsc::unbounded_channel();
    let tracker = PendingAnswerTracker::with_events(
        Arc::clone(&store),
        gateway.clone(),
        RetryPolicy::no_retry(),
        tx,
    );
    let ctx = HabitContext {
        table: Arc::new(ScheduleTable::new(entries).expect("valid schedule")),
        registry: Arc::new(MemorySubjectRegistry::with_subjects(
            subjects.iter().map(|s| SubjectId::from(*s)),
        )),
        store,
        gateway: gateway.clone(),
        tracker,
        renderer: Arc::new(JsonReportRenderer::new(
            dir.path().join("reports"),
            RetryPolicy::no_retry(),
        )),
        grace: GracePolicy::default(),
        send_retry: RetryPolicy::no_retry(),
    };
    Harness {
        dir,
        gateway,
        ctx,
        events,
    }
}

impl Harness {
    /// Wait for the next tracker event matching `pred`, skipping others.
    pub(crate) async fn next_event(&mut self, pred: impl Fn(&PendingEvent) -> bool) -> PendingEvent {
        loop {
            let event = self.events.recv().await.expect("tracker event channel open");
            if pred(&event) {
                return event;
            }
        }
    }
}

pub(crate) fn reports() -> ReportSchedule {
    ReportSchedule {
        monthly_time: "23:59".parse().expect("time"),
        weekly: Some((Weekday::Sat, "23:59".parse().expect("time"))),
    }
}

pub(crate) fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").expect("datetime")
}

pub(crate) fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("date")
}
