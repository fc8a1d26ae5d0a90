//! # BuildRAG Record Store
//!
//! Append-only, line-oriented log of CI build records. The store is the
//! ingestion system of record: the collector appends new builds here, and
//! the indexer reads the full log to rebuild the search artifact.
//!
//! ## Layout
//!
//! ```text
//! data/builds.jsonl
//!     │
//!     ├──> one self-describing JSON record per line
//!     ├──> write order preserved
//!     └──> records are never mutated or deleted
//! ```
//!
//! `(job, build_number)` is the natural key; the collector deduplicates
//! against [`RecordStore::existing_keys`] before fetching remote detail.

mod error;
mod store;
mod types;

pub use error::{RecordStoreError, Result};
pub use store::RecordStore;
pub use types::{BuildKey, BuildRecord, BuildResult};
