//! Local health checks
//!
//! Provides:
//! - Execution of a single check command and classification of its exit code
//! - Ordered evaluation of a check list into one pass/fail verdict

pub mod checker;
pub mod verdict;

pub use checker::{CheckRunner, CommandRunner};
pub use verdict::{HealthEvaluator, Verdict};
