//! Monitoring engine module - handles execution of monitoring cycles
//!
//! This module is responsible for:
//! - Probing server agents for failed scheduled jobs
//! - Filtering findings with per-server include/exclude patterns
//! - Aggregating per-server outcomes into a classified report

pub mod agent;
pub mod filter;
pub mod monitor;
pub mod prober;
pub mod types;

pub use monitor::Monitor;
pub use types::{Finding, Report, ReportStatus, ServerOutcome};
