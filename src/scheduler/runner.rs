//! Dispatcher loop.
//!
//! Wakes on a fixed interval, truncates local time to the minute and turns
//! matching schedule entries into prompts for every registered subject. The
//! same tick checks the monthly/weekly report boundaries. A late tick replays
//! the minutes it jumped over. Each tick's fan-out runs on its own task so a
//! slow gateway or disk never stalls the interval.

use crate::context::HabitContext;
use crate::gateway::deliver;
use crate::pending::DEFAULT_ANSWER;
use crate::registry::SubjectId;
use crate::schedule::{ScheduleEntry, TimeOfDay};
use crate::scheduler::boundary::ReportSchedule;
use crate::scheduler::ledger::DispatchLedger;
use crate::store::{FillOutcome, ReportPeriod};
use chrono::{Local, NaiveDateTime, TimeDelta};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Interval between dispatcher ticks (seconds). Several ticks land in each
/// minute; repeats are skipped.
pub const DEFAULT_TICK_SECS: u64 = 15;

/// Missed minutes replayed after a late tick or a stall.
pub const MAX_CATCH_UP_MINUTES: i64 = 15;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Minute the tick was evaluated for.
    pub minute: Option<NaiveDateTime>,
    /// The minute had already been processed.
    pub skipped: bool,
    /// Earlier minutes replayed because the previous tick came too late.
    pub caught_up: usize,
    pub subjects: usize,
    pub prompts_sent: usize,
    pub prompts_failed: usize,
    /// Earlier areas auto-filled before a prompt.
    pub backfilled: usize,
    pub reports_sent: usize,
    pub reports_failed: usize,
    /// Reports already present in the dispatch ledger.
    pub reports_deduped: usize,
    /// Isolated errors (store, registry, ledger, task panics).
    pub errors: usize,
}

impl TickReport {
    fn absorb(&mut self, other: &TickReport) {
        self.prompts_sent += other.prompts_sent;
        self.prompts_failed += other.prompts_failed;
        self.backfilled += other.backfilled;
        self.reports_sent += other.reports_sent;
        self.reports_failed += other.reports_failed;
        self.reports_deduped += other.reports_deduped;
        self.errors += other.errors;
    }

    /// Whether anything was attempted.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.prompts_sent
            + self.prompts_failed
            + self.backfilled
            + self.reports_sent
            + self.reports_failed
            + self.reports_deduped
            + self.errors
            == 0
    }
}

/// Time-driven prompt and report dispatcher.
pub struct Dispatcher {
    ctx: HabitContext,
    reports: ReportSchedule,
    tick: Duration,
    ledger: Arc<tokio::sync::Mutex<DispatchLedger>>,
    last_minute: Mutex<Option<NaiveDateTime>>,
}

impl Dispatcher {
    pub fn new(ctx: HabitContext, reports: ReportSchedule, ledger: DispatchLedger) -> Self {
        Self {
            ctx,
            reports,
            tick: Duration::from_secs(DEFAULT_TICK_SECS),
            ledger: Arc::new(tokio::sync::Mutex::new(ledger)),
            last_minute: Mutex::new(None),
        }
    }

    /// Override the tick interval.
    #[must_use]
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_secs(1));
        self
    }

    /// Evaluate the minute containing `now`, plus any minutes skipped since
    /// the previous tick (at most [`MAX_CATCH_UP_MINUTES`]).
    pub async fn tick_at(&self, now: NaiveDateTime) -> TickReport {
        let time = TimeOfDay::truncate(now.time());
        let minute = now.date().and_time(time.as_naive());
        let mut report = TickReport {
            minute: Some(minute),
            ..TickReport::default()
        };

        let Some(first) = self.claim_minutes(minute) else {
            debug!("minute {minute} already processed");
            report.skipped = true;
            return report;
        };

        let mut current = first;
        while current < minute {
            debug!("catching up on missed minute {current}");
            let part = self.evaluate(current).await;
            report.subjects = report.subjects.max(part.subjects);
            report.absorb(&part);
            report.caught_up += 1;
            current += TimeDelta::minutes(1);
        }
        let part = self.evaluate(minute).await;
        report.subjects = report.subjects.max(part.subjects);
        report.absorb(&part);

        if !report.is_idle() {
            info!(
                "tick {minute}: {} prompts sent, {} failed, {} backfilled, {} reports sent, {} errors",
                report.prompts_sent,
                report.prompts_failed,
                report.backfilled,
                report.reports_sent,
                report.errors
            );
        }
        report
    }

    /// Mark every minute up to `minute` as processed and return the first
    /// one this tick must evaluate, or `None` when `minute` was already seen.
    fn claim_minutes(&self, minute: NaiveDateTime) -> Option<NaiveDateTime> {
        let window = TimeDelta::minutes(MAX_CATCH_UP_MINUTES);
        let mut last = self
            .last_minute
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let first = match *last {
            None => minute,
            Some(prev) if prev >= minute && prev - minute <= window => return None,
            // The wall clock jumped back further than the window; start over.
            Some(prev) if prev >= minute => minute,
            Some(prev) if minute - prev > window => {
                warn!(
                    "dispatcher stalled from {prev} to {minute}, only the last {MAX_CATCH_UP_MINUTES} minutes are replayed"
                );
                minute - window + TimeDelta::minutes(1)
            }
            Some(prev) => prev + TimeDelta::minutes(1),
        };
        *last = Some(minute);
        Some(first)
    }

    /// Prompts and reports due in exactly one minute.
    async fn evaluate(&self, minute: NaiveDateTime) -> TickReport {
        let mut report = TickReport::default();
        let time = TimeOfDay::truncate(minute.time());
        let entries: Vec<ScheduleEntry> = self
            .ctx
            .table
            .match_minute(time)
            .into_iter()
            .cloned()
            .collect();
        let due = self.reports.due(minute);
        if entries.is_empty() && due.is_empty() {
            return report;
        }

        let subjects = match self.ctx.registry.list_all().await {
            Ok(subjects) => subjects,
            Err(e) => {
                warn!("cannot list subjects for {minute}: {e}");
                report.errors += 1;
                return report;
            }
        };
        report.subjects = subjects.len();

        if !entries.is_empty() {
            let entries = Arc::new(entries);
            let mut tasks = JoinSet::new();
            for subject in &subjects {
                let ctx = self.ctx.clone();
                let entries = Arc::clone(&entries);
                let subject = subject.clone();
                tasks.spawn(async move { prompt_subject(&ctx, &subject, &entries, minute).await });
            }
            collect(&mut tasks, &mut report).await;
        }

        for period in due {
            let mut tasks = JoinSet::new();
            for subject in &subjects {
                let ctx = self.ctx.clone();
                let ledger = Arc::clone(&self.ledger);
                let subject = subject.clone();
                tasks.spawn(async move { dispatch_report(&ctx, &ledger, &subject, period).await });
            }
            collect(&mut tasks, &mut report).await;
        }
        report
    }

    /// Start the background loop. Stops when `shutdown` is cancelled, after
    /// in-flight ticks finish.
    pub fn run(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "dispatcher started with {} schedule entries, tick every {:?}",
                self.ctx.table.entries().len(),
                self.tick
            );
            let ticks = TaskTracker::new();
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let now = Local::now().naive_local();
                        let this = Arc::clone(&self);
                        ticks.spawn(async move {
                            this.tick_at(now).await;
                        });
                    }
                }
            }

            ticks.close();
            ticks.wait().await;
            info!("dispatcher stopped");
        })
    }
}

async fn collect(tasks: &mut JoinSet<TickReport>, report: &mut TickReport) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(part) => report.absorb(&part),
            Err(e) => {
                warn!("dispatch task failed: {e}");
                report.errors += 1;
            }
        }
    }
}

/// Backfill, send and arm every matched entry for one subject.
async fn prompt_subject(
    ctx: &HabitContext,
    subject: &SubjectId,
    entries: &[ScheduleEntry],
    minute: NaiveDateTime,
) -> TickReport {
    let mut tally = TickReport::default();
    let date = minute.date();

    for entry in entries {
        for area in ctx.table.areas_before(entry.time) {
            match ctx
                .store
                .fill_if_absent(subject, date, area, DEFAULT_ANSWER)
                .await
            {
                Ok(FillOutcome::Filled) => {
                    debug!("backfilled {area} for {subject} on {date}");
                    tally.backfilled += 1;
                }
                Ok(FillOutcome::AlreadyPresent) => {}
                Err(e) => {
                    warn!("backfill of {area} for {subject} failed: {e}");
                    tally.errors += 1;
                    let notice = format!("Could not save your {area} record for {date}: {e}");
                    if let Err(e) = ctx.notify(subject, &notice).await {
                        warn!("failure notice to {subject} not delivered: {e}");
                    }
                }
            }
        }

        let prompt = entry.prompt();
        let operation = format!("send {} prompt to {subject}", entry.area);
        match deliver(&ctx.send_retry, &operation, || {
            ctx.gateway.send_prompt(subject, &prompt)
        })
        .await
        {
            Ok(()) => {
                tally.prompts_sent += 1;
                let grace = ctx.grace.window_at(&ctx.table, minute);
                ctx.tracker.arm(subject, &entry.area, date, minute, grace);
            }
            Err(e) => {
                warn!("{operation} failed: {e}");
                tally.prompts_failed += 1;
            }
        }
    }
    tally
}

/// Send one period report unless the ledger already holds it.
async fn dispatch_report(
    ctx: &HabitContext,
    ledger: &tokio::sync::Mutex<DispatchLedger>,
    subject: &SubjectId,
    period: ReportPeriod,
) -> TickReport {
    let mut tally = TickReport::default();
    let key = format!("report:{}:{subject}", period.label());
    if ledger.lock().await.contains(&key) {
        debug!("{key} already dispatched");
        tally.reports_deduped += 1;
        return tally;
    }

    match ctx.send_report(subject, period).await {
        Ok(_) => {
            tally.reports_sent += 1;
            if let Err(e) = ledger.lock().await.record(&key).await {
                warn!("cannot record {key}: {e}");
                tally.errors += 1;
            }
        }
        Err(e) => {
            warn!("{} report for {subject} failed: {e}", period.label());
            tally.reports_failed += 1;
        }
    }
    tally
}
