//! Workload side of the feedback channel
//!
//! A workload counts its requests and, once per interval, reports the count
//! to the controller ingress with a short timeout and a fixed retry budget.

mod client;
mod counter;
mod reporter;

pub use client::{ReportOutcome, ReportingClient, ReportingConfig};
pub use counter::RequestCounter;
pub use reporter::{aligned_wait, round_marker, run_reporter};
