//! Time-driven dispatch of prompts and period reports.

pub mod boundary;
pub mod ledger;
pub mod runner;

pub use boundary::ReportSchedule;
pub use ledger::DispatchLedger;
pub use runner::{DEFAULT_TICK_SECS, Dispatcher, TickReport};
