//! Rebuilds the retrieval artifact from the record store.
//!
//! Indexing is a full rebuild: every run re-reads the complete record
//! store, re-embeds every rendered build summary, and replaces the
//! persisted artifact wholesale. There is no incremental index update,
//! which keeps the positional alignment between vectors and metadata
//! trivially correct.

mod error;
mod indexer;

pub use error::{IndexerError, Result};
pub use indexer::{CorpusIndexer, IndexStats};
