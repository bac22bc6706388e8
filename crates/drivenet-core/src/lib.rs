pub mod config;
pub mod error;
pub mod types;

pub use error::{DrivenetError, DrivenetResult};
pub use types::{FileMetadata, Hmac, Mirror, ProgressState};
