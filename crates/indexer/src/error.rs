use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("record store error: {0}")]
    RecordStore(#[from] buildrag_record_store::RecordStoreError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] buildrag_vector_store::VectorStoreError),
}
