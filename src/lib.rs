//! Habitual: a daily habit check-in service.
//!
//! At configured minutes of the day every subscribed subject is asked a
//! question about one life area (a yes/no or a 0..=10 score). Answers are
//! stored per subject and day; unanswered questions are filled with zero
//! once their grace window closes or the next question is due. Monthly and
//! weekly summaries are rendered and delivered at period boundaries.
//!
//! # Architecture
//!
//! - **Dispatcher**: minute ticks drive backfill, prompts and reports
//! - **Pending tracker**: one cancellable timer per outstanding question
//! - **Record store**: one actor per subject serializes container commits
//! - **Gateway**: Telegram (polling or webhook) plus an HTTP answer API
//! - **Inbound handler**: records answers and runs subject commands

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod gateway;
pub mod habit_dirs;
pub mod inbound;
pub mod pending;
pub mod registry;
pub mod report;
pub mod retry;
pub mod runtime;
pub mod schedule;
pub mod scheduler;
pub mod store;

pub use config::HabitConfig;
pub use context::HabitContext;
pub use error::{HabitError, Result};
pub use gateway::{Command, InboundEvent, MessagingGateway, Prompt};
pub use inbound::{InboundHandler, InboundOutcome};
pub use pending::{GracePolicy, PendingAnswerTracker};
pub use registry::{SubjectId, SubjectRegistry};
pub use runtime::HabitRuntime;
pub use schedule::{PromptKind, ScheduleEntry, ScheduleTable, TimeOfDay};
pub use scheduler::{Dispatcher, TickReport};
pub use store::{RecordStore, ReportPeriod};
