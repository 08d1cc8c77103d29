//! Inbound event handling: answers and subject commands.
//!
//! The shared queue is fanned out to one worker per subject. A subject's
//! events are handled in arrival order, and a slow store commit or reply for
//! one subject never holds back another.

use crate::context::HabitContext;
use crate::gateway::{Command, InboundEvent};
use crate::registry::SubjectId;
use crate::schedule::PromptKind;
use crate::store::ReportPeriod;
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const HELP_TEXT: &str = "Daily habit check-ins\n\
/start - subscribe to the daily questions\n\
/stop - unsubscribe\n\
/report - receive this month's report now\n\
/help - show this message";

/// What handling one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The answer was stored for `date`.
    Recorded { date: NaiveDate, resolved_pending: bool },
    /// The answer was invalid and nothing was stored.
    Rejected,
    /// Storage or delivery failed.
    Failed,
    /// A command was carried out.
    Handled(Command),
}

pub struct InboundHandler {
    ctx: HabitContext,
}

impl InboundHandler {
    pub fn new(ctx: HabitContext) -> Self {
        Self { ctx }
    }

    /// Handle one event against the local clock.
    pub async fn handle(&self, event: InboundEvent) -> InboundOutcome {
        self.handle_at(event, Local::now().naive_local()).await
    }

    /// Handle one event as if received at `now`.
    pub async fn handle_at(&self, event: InboundEvent, now: NaiveDateTime) -> InboundOutcome {
        match event {
            InboundEvent::Answer {
                subject,
                area,
                value,
            } => self.on_answer(&subject, &area, value, now).await,
            InboundEvent::Command { subject, command } => {
                self.on_command(&subject, command, now).await
            }
        }
    }

    /// Consume `inbound_rx` until it closes or `shutdown` is cancelled.
    /// Events already routed to a subject worker are still handled before
    /// the returned task completes.
    pub fn run(
        self: Arc<Self>,
        mut inbound_rx: mpsc::Receiver<InboundEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("inbound handler started");
            let workers = TaskTracker::new();
            let mut queues: HashMap<SubjectId, mpsc::UnboundedSender<InboundEvent>> =
                HashMap::new();
            loop {
                let event = tokio::select! {
                    () = shutdown.cancelled() => break,
                    event = inbound_rx.recv() => event,
                };
                let Some(event) = event else {
                    break;
                };
                let subject = event.subject().clone();
                let queue = queues.entry(subject.clone()).or_insert_with(|| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    workers.spawn(Arc::clone(&self).serve_subject(subject.clone(), rx));
                    tx
                });
                if queue.send(event).is_err() {
                    warn!("inbound worker for {subject} is gone, event dropped");
                    queues.remove(&subject);
                }
            }

            let active = queues.len();
            drop(queues);
            workers.close();
            workers.wait().await;
            info!("inbound handler stopped ({active} subject workers)");
        })
    }

    async fn serve_subject(
        self: Arc<Self>,
        subject: SubjectId,
        mut queue: mpsc::UnboundedReceiver<InboundEvent>,
    ) {
        debug!("inbound worker for {subject} started");
        while let Some(event) = queue.recv().await {
            let outcome = self.handle(event).await;
            debug!("inbound event from {subject} handled: {outcome:?}");
        }
    }

    async fn on_answer(
        &self,
        subject: &SubjectId,
        area: &str,
        value: u8,
        now: NaiveDateTime,
    ) -> InboundOutcome {
        let Some(kind) = self.ctx.table.kind_for(area) else {
            warn!("answer from {subject} for unknown area {area}");
            self.reply(subject, &format!("Unknown area \"{area}\"; answer ignored."))
                .await;
            return InboundOutcome::Rejected;
        };
        if !kind.accepts(value) {
            warn!("answer {value} from {subject} out of range for {area}");
            let text = format!(
                "Invalid value {value} for {area}; expected 0 to {}.",
                kind.max_value()
            );
            self.reply(subject, &text).await;
            return InboundOutcome::Rejected;
        }

        let pending = self.ctx.tracker.resolve_answer(subject, area);
        let resolved_pending = pending.is_some();
        let date = pending.map_or(now.date(), |p| p.date);

        match self.ctx.store.write(subject, date, area, value).await {
            Ok(()) => {
                info!("recorded {area}={value} for {subject} on {date}");
                let text = match kind {
                    PromptKind::Binary => {
                        let answer = if value >= 1 { "YES" } else { "NO" };
                        format!("Answer recorded for {area}: {answer}")
                    }
                    PromptKind::Scale => format!("Score recorded for {area}: {value}"),
                };
                self.reply(subject, &text).await;
                InboundOutcome::Recorded {
                    date,
                    resolved_pending,
                }
            }
            Err(e) => {
                warn!("cannot record {area} for {subject}: {e}");
                self.reply(
                    subject,
                    &format!("Could not record your answer for {area}. Please try again."),
                )
                .await;
                InboundOutcome::Failed
            }
        }
    }

    async fn on_command(
        &self,
        subject: &SubjectId,
        command: Command,
        now: NaiveDateTime,
    ) -> InboundOutcome {
        let result = match command {
            Command::Start => self.ctx.registry.register(subject).await.map(|_| {
                "You are subscribed to the daily habit check-ins.".to_owned()
            }),
            Command::Stop => self
                .ctx
                .registry
                .unregister(subject)
                .await
                .map(|_| "You were removed from the daily habit check-ins.".to_owned()),
            Command::Report => {
                let period = ReportPeriod::month_of(now.date());
                match self.ctx.send_report(subject, period).await {
                    Ok(_) => return InboundOutcome::Handled(command),
                    Err(e) => Err(e),
                }
            }
            Command::Help => Ok(HELP_TEXT.to_owned()),
        };

        match result {
            Ok(text) => {
                self.reply(subject, &text).await;
                InboundOutcome::Handled(command)
            }
            Err(e) => {
                warn!("{command:?} for {subject} failed: {e}");
                self.reply(subject, "Something went wrong. Please try again later.")
                    .await;
                InboundOutcome::Failed
            }
        }
    }

    async fn reply(&self, subject: &SubjectId, text: &str) {
        if let Err(e) = self.ctx.notify(subject, text).await {
            warn!("reply to {subject} not delivered: {e}");
        }
    }
}
