//! Seams between the pipelines and the network
//!
//! [`BridgeApi`] covers the metadata/negotiation endpoints; [`ShardTransport`]
//! moves ciphertext to and from mirror or signed URLs. The HTTP implementation
//! lives in [`crate::http`]; tests substitute in-memory fakes.

use async_trait::async_trait;
use bytes::Bytes;
use drivenet_core::{FileMetadata, Mirror};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::Authorization;
use crate::error::TransferResult;

/// Body of one shard response
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Per-PUT progress: `(loaded, total)` for that request alone
pub type PutProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Failure moving bytes to or from a URL
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Connection(String),
    #[error("reading body: {0}")]
    Body(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Everything needed to start streaming a file
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub metadata: FileMetadata,
    pub mirrors: Vec<Mirror>,
}

/// Upload slot handed out by the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub uuid: String,
    /// One signed URL per part, in part order
    pub urls: Vec<String>,
    /// Present for multipart uploads
    pub upload_id: Option<String>,
}

/// Result of one successful PUT
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutReceipt {
    pub etag: Option<String>,
}

/// Request body of the finish-upload call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCommit {
    /// Hex crypto index the file was encrypted under
    pub index: String,
    pub shards: Vec<ShardCommit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardCommit {
    /// SHA-256 hex of the full ciphertext
    pub hash: String,
    pub uuid: String,
    #[serde(rename = "UploadId", default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<CommittedPart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Bridge metadata and upload-negotiation endpoints.
///
/// Implementations map their failures onto the matching [`crate::TransferError`]
/// variant; `download_plan` reports files the v2 protocol cannot serve with
/// `LegacyFormat`.
#[async_trait]
pub trait BridgeApi: Send + Sync {
    /// v2 lookup: metadata and shard mirrors in one call.
    async fn download_plan(
        &self,
        auth: &Authorization,
        bucket_id: &str,
        file_id: &str,
    ) -> TransferResult<DownloadPlan>;

    /// Legacy file info.
    async fn file_info(
        &self,
        auth: &Authorization,
        bucket_id: &str,
        file_id: &str,
    ) -> TransferResult<FileMetadata>;

    /// Legacy mirror list.
    async fn mirrors(
        &self,
        auth: &Authorization,
        bucket_id: &str,
        file_id: &str,
    ) -> TransferResult<Vec<Mirror>>;

    async fn start_upload(
        &self,
        auth: &Authorization,
        bucket_id: &str,
        size: u64,
        parts: u32,
    ) -> TransferResult<UploadTarget>;

    /// Commit an uploaded file; returns the new file id.
    async fn finish_upload(
        &self,
        auth: &Authorization,
        bucket_id: &str,
        commit: &UploadCommit,
    ) -> TransferResult<String>;
}

/// Raw byte transport for shard GETs and part PUTs
#[async_trait]
pub trait ShardTransport: Send + Sync {
    /// Open `url` and return its body as a stream.
    async fn fetch(&self, url: &str) -> Result<ByteStream, TransportError>;

    /// PUT `body` to `url`, reporting bytes handed to the network.
    async fn put(
        &self,
        url: &str,
        body: Bytes,
        progress: PutProgressFn,
    ) -> Result<PutReceipt, TransportError>;
}
