use thiserror::Error;

pub type DrivenetResult<T> = Result<T, DrivenetError>;

#[derive(Debug, Error)]
pub enum DrivenetError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
