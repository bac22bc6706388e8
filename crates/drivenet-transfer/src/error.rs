use drivenet_crypto::CryptoError;
use thiserror::Error;

pub type TransferResult<T> = Result<T, TransferError>;

/// Every failure a transfer can end in.
///
/// Aborts are their own variants so callers can tell a user-initiated stop
/// from a real failure; see [`TransferError::is_aborted`].
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("fetching metadata for {bucket}/{file}: {reason}")]
    MetadataFetch {
        bucket: String,
        file: String,
        reason: String,
    },

    #[error("file {bucket}/{file} is stored in the legacy format")]
    LegacyFormat { bucket: String, file: String },

    #[error("resolving mirrors for {bucket}/{file}: {reason}")]
    MirrorResolution {
        bucket: String,
        file: String,
        reason: String,
    },

    #[error("shard {shard} of {bucket}/{file}: {reason}")]
    NetworkShard {
        bucket: String,
        file: String,
        shard: u32,
        reason: String,
    },

    #[error("deriving key for bucket {bucket}: {source}")]
    KeyDerivation {
        bucket: String,
        #[source]
        source: CryptoError,
    },

    #[error("decrypting {bucket}/{file}: {reason}")]
    Decryption {
        bucket: String,
        file: String,
        reason: String,
    },

    #[error("download of {bucket}/{file} aborted")]
    Aborted { bucket: String, file: String },

    #[error("negotiating upload to bucket {bucket}: {reason}")]
    UploadNegotiation { bucket: String, reason: String },

    #[error("reading upload source for bucket {bucket}: {reason}")]
    UploadSource { bucket: String, reason: String },

    #[error("part {part} of upload to bucket {bucket}: {reason}")]
    UploadTransfer {
        bucket: String,
        part: u32,
        status: Option<u16>,
        reason: String,
    },

    #[error("upload to bucket {bucket} aborted")]
    UploadAborted { bucket: String },

    #[error("finalizing upload to bucket {bucket}: {reason}")]
    Finalize { bucket: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// True for a cancelled download or upload.
    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            TransferError::Aborted { .. } | TransferError::UploadAborted { .. }
        )
    }
}
