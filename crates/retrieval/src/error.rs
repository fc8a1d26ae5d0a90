use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("vector store error: {0}")]
    Index(#[from] buildrag_vector_store::VectorStoreError),

    #[error("text generation failed: {0}")]
    Generation(String),
}
