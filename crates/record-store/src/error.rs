use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecordStoreError>;

#[derive(Error, Debug)]
pub enum RecordStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
