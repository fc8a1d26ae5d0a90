use thiserror::Error;

pub type Result<T> = std::result::Result<T, CollectorError>;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("CI request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected CI response: {0}")]
    BadResponse(String),

    #[error("Record store error: {0}")]
    RecordStore(#[from] buildrag_record_store::RecordStoreError),
}
