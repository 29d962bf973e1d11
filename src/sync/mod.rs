//! Sync engine
//!
//! Status change detection, rule matching, action execution and the cycle
//! that ties them together for one tenant.

pub mod audit;
pub mod detector;
pub mod executor;
pub mod orchestrator;
pub mod rules;

pub use audit::{CycleReport, SkipReason};
pub use detector::detect;
pub use executor::{ActionOutcome, Executor};
pub use orchestrator::Orchestrator;
pub use rules::{log_unmatched, match_rule};
