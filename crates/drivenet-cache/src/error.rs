use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(String),

    #[error("ledger snapshot error: {0}")]
    Snapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<opendal::Error> for CacheError {
    fn from(e: opendal::Error) -> Self {
        CacheError::Storage(e.to_string())
    }
}
