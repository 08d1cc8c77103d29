//! Integration test binary: all scenarios share one binary to keep link
//! time down.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod helpers;

mod daily_flow;
mod registry_persistence;
mod report_boundaries;
mod telegram_contract;
mod webhook_ingress;
