//! # BuildRAG Vector Store
//!
//! Embedding model, exact nearest-neighbor index, and the persisted
//! (index, metadata) artifact for build-history retrieval.
//!
//! ## Architecture
//!
//! ```text
//! BuildRecord[]
//!     │
//!     ├──> Embedding Model (ONNX Runtime)
//!     │      └─> Vector[384]
//!     │
//!     ├──> Flat Index
//!     │      └─> Exact k-NN under squared L2
//!     │
//!     └──> Index Artifact
//!            └─> vectors.bin + metadata.json, one logical version
//! ```
//!
//! The metadata array and vector index are built from the same ordered
//! sequence and persisted together: position *i* in one always describes
//! position *i* in the other. Loading validates counts, the embedding
//! model tag, and a checksum binding the two files, and refuses to serve
//! on any mismatch.

mod artifact;
mod embeddings;
mod error;
mod flat_index;

pub use artifact::{IndexArtifact, METADATA_SCHEMA_VERSION};
pub use embeddings::{EmbeddingMode, EmbeddingModel, EmbeddingOptions};
pub use error::{Result, VectorStoreError};
pub use flat_index::{FlatIndex, Neighbor};
