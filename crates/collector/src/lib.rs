//! # BuildRAG Collector
//!
//! Polls an external CI system and keeps the record store current without
//! re-fetching or duplicating a build.
//!
//! ## Cycle
//!
//! ```text
//! Record Store ──existing_keys──┐
//!                               ├──> set difference ──> fetch detail ──> append
//! CI system ──list_builds───────┘         (each build isolated)
//! ```
//!
//! Cycles are strictly sequential: the polling loop finishes cycle *n*
//! before starting cycle *n+1*, and stops cleanly on a shutdown signal.

mod collector;
mod error;
mod jenkins;

pub use collector::{Collector, CycleOutcome};
pub use error::{CollectorError, Result};
pub use jenkins::{BuildDetail, BuildSource, JenkinsClient};
