//! Schema module - configuration and report types for tuning runs.

mod config;
mod report;

pub use config::*;
pub use report::*;
