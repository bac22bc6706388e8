//! drivenet-transfer: encrypted transfer pipelines against the storage network
//!
//! Download: bridge lookup (v2, falling back to the legacy multi-mirror
//! protocol) → ordered shard fetch → AES-256-CTR decipher → progress → caller.
//!
//! Upload: negotiate signed URLs → AES-256-CTR encipher → single or multipart
//! PUT with aggregated progress → commit.
//!
//! Both pipelines take credentials and key material explicitly and observe a
//! [`CancellationToken`](tokio_util::sync::CancellationToken) at every
//! suspension point.

pub mod auth;
pub mod blob;
pub mod bridge;
pub mod cancel;
pub mod download;
pub mod error;
pub mod http;
pub mod progress;
pub mod upload;

pub use auth::{Authorization, Credentials, KeyMaterial};
pub use blob::fetch_cached;
pub use bridge::{BridgeApi, ShardTransport};
pub use download::{DownloadRequest, DownloadSettings, DownloadState, Downloader, PlaintextStream};
pub use error::{TransferError, TransferResult};
pub use http::{http_pipelines, HttpBridge};
pub use progress::{ProgressFn, TransferOptions};
pub use upload::{ByteSource, UploadRequest, UploadResult, UploadSettings, UploadState, Uploader};
