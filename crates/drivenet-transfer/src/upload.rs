//! Upload pipeline: negotiate → encipher → PUT part(s) → commit

use bytes::{Bytes, BytesMut};
use drivenet_core::config::TransferConfig;
use drivenet_crypto::{
    content_hash, derive_key, extract_iv, generate_index, make_cipher_stream, CtrTransform,
};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use secrecy::SecretString;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::auth::{Authorization, Credentials};
use crate::bridge::{
    BridgeApi, CommittedPart, PutProgressFn, PutReceipt, ShardCommit, ShardTransport,
    UploadCommit, UploadTarget,
};
use crate::cancel::until_cancelled;
use crate::error::{TransferError, TransferResult};
use crate::progress::{PartProgress, TransferOptions};

const MAX_PREALLOC: usize = 64 * 1024 * 1024;

/// Upload lifecycle. Observers see every state after `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadState {
    #[default]
    Idle,
    Negotiating,
    EncryptingTransferring,
    Finalizing,
    Complete,
    Aborted,
    Failed,
}

pub type UploadOptions = TransferOptions<UploadState>;

/// Plaintext to upload: a byte stream and its exact length.
pub struct ByteSource {
    size: u64,
    stream: BoxStream<'static, io::Result<Bytes>>,
}

impl ByteSource {
    pub fn new<S>(size: u64, stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            size,
            stream: stream.boxed(),
        }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self::new(size, stream::once(async move { Ok(data) }))
    }

    /// Stream a local file.
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self::new(size, ReaderStream::new(file)))
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

pub struct UploadRequest {
    pub bucket_id: String,
    pub source: ByteSource,
    pub credentials: Credentials,
    pub mnemonic: SecretString,
    /// Requested part count; the configured default applies when absent
    pub parts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub file_id: String,
    pub bucket_id: String,
    pub size: u64,
    pub parts: u32,
    /// Hex crypto index the file was encrypted under
    pub index: String,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub upload_concurrency: usize,
    pub default_parts: u32,
}

impl UploadSettings {
    pub fn from_config(transfer: &TransferConfig) -> Self {
        Self {
            upload_concurrency: transfer.upload_concurrency,
            default_parts: transfer.default_parts,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            upload_concurrency: 4,
            default_parts: 1,
        }
    }
}

pub struct Uploader {
    bridge: Arc<dyn BridgeApi>,
    transport: Arc<dyn ShardTransport>,
    settings: UploadSettings,
}

impl Uploader {
    pub fn new(
        bridge: Arc<dyn BridgeApi>,
        transport: Arc<dyn ShardTransport>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            bridge,
            transport,
            settings,
        }
    }

    /// Encrypt and store `request.source`, returning the committed file id.
    pub async fn upload(
        &self,
        request: UploadRequest,
        options: UploadOptions,
    ) -> TransferResult<UploadResult> {
        let bucket = request.bucket_id.clone();
        match self.run(request, &options).await {
            Ok(result) => {
                info!(
                    bucket = %result.bucket_id,
                    file = %result.file_id,
                    bytes = result.size,
                    parts = result.parts,
                    "upload complete"
                );
                options.emit(UploadState::Complete);
                Ok(result)
            }
            Err(e) => {
                if e.is_aborted() {
                    debug!(bucket = %bucket, "upload cancelled");
                    options.emit(UploadState::Aborted);
                } else {
                    warn!(bucket = %bucket, error = %e, "upload failed");
                    options.emit(UploadState::Failed);
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: UploadRequest,
        options: &UploadOptions,
    ) -> TransferResult<UploadResult> {
        let UploadRequest {
            bucket_id,
            source,
            credentials,
            mnemonic,
            parts,
        } = request;
        let bucket = bucket_id.as_str();
        let aborted = || TransferError::UploadAborted {
            bucket: bucket.to_string(),
        };

        let size = source.size();
        let requested = parts.unwrap_or(self.settings.default_parts);
        let (parts, part_len) = plan_parts(size, requested);
        if parts != requested.max(1) {
            debug!(bucket, size, requested, parts, "adjusted part count to the file size");
        }

        let auth = Authorization::from_credentials(&credentials);
        let index = generate_index();
        let key_error = |source| TransferError::KeyDerivation {
            bucket: bucket.to_string(),
            source,
        };
        let key = derive_key(&mnemonic, bucket, &index).map_err(key_error)?;
        let iv = extract_iv(&index).map_err(key_error)?;

        options.emit(UploadState::Negotiating);
        let target = until_cancelled(
            &options.cancel,
            aborted,
            self.bridge.start_upload(&auth, bucket, size, parts),
        )
        .await?;
        check_target(bucket, &target, parts)?;
        debug!(bucket, uuid = %target.uuid, parts, "upload negotiated");

        options.emit(UploadState::EncryptingTransferring);
        let cipher = make_cipher_stream(&key, &iv);
        let ciphertext =
            until_cancelled(&options.cancel, aborted, encrypt_source(bucket, source, cipher))
                .await?;
        let hash = content_hash(&ciphertext);
        let bodies = split_parts(&ciphertext, part_len);

        let receipts = until_cancelled(
            &options.cancel,
            aborted,
            self.put_parts(bucket, &target, bodies, options),
        )
        .await?;

        options.emit(UploadState::Finalizing);
        let commit = build_commit(bucket, hex::encode(index), hash, &target, receipts)?;
        let file_id = until_cancelled(
            &options.cancel,
            aborted,
            self.bridge.finish_upload(&auth, bucket, &commit),
        )
        .await?;

        Ok(UploadResult {
            file_id,
            bucket_id: bucket.to_string(),
            size,
            parts,
            index: commit.index,
        })
    }

    async fn put_parts(
        &self,
        bucket: &str,
        target: &UploadTarget,
        bodies: Vec<Bytes>,
        options: &UploadOptions,
    ) -> TransferResult<Vec<PutReceipt>> {
        let tracker = Arc::new(PartProgress::new(
            bodies.iter().map(|b| b.len() as u64).collect(),
            options.progress.clone(),
        ));

        let mut done: Vec<(usize, PutReceipt)> =
            stream::iter(target.urls.iter().cloned().zip(bodies).enumerate())
                .map(|(i, (url, body))| {
                    let transport = Arc::clone(&self.transport);
                    let tracker = Arc::clone(&tracker);
                    let bucket = bucket.to_string();
                    async move {
                        let part = i as u32 + 1;
                        debug!(bucket = %bucket, part, bytes = body.len(), "uploading part");
                        let reporter = Arc::clone(&tracker);
                        let progress: PutProgressFn =
                            Arc::new(move |loaded, _total| reporter.report(i, loaded));
                        let receipt = transport.put(&url, body, progress).await.map_err(|e| {
                            TransferError::UploadTransfer {
                                bucket,
                                part,
                                status: e.status(),
                                reason: e.to_string(),
                            }
                        })?;
                        tracker.complete(i);
                        Ok::<_, TransferError>((i, receipt))
                    }
                })
                .buffer_unordered(self.settings.upload_concurrency.max(1))
                .try_collect()
                .await?;

        done.sort_by_key(|(i, _)| *i);
        Ok(done.into_iter().map(|(_, receipt)| receipt).collect())
    }
}

/// Pick the part count and part length for `size` bytes.
///
/// Parts are `ceil(size / parts)` bytes with a shorter last one; the count
/// is reduced when that split would leave a part empty.
fn plan_parts(size: u64, requested: u32) -> (u32, u64) {
    if size == 0 || requested <= 1 {
        return (1, size);
    }
    let wanted = u64::from(requested).min(size);
    let part_len = size.div_ceil(wanted);
    let parts = size.div_ceil(part_len);
    (parts as u32, part_len)
}

fn split_parts(ciphertext: &Bytes, part_len: u64) -> Vec<Bytes> {
    if ciphertext.is_empty() || part_len == 0 {
        return vec![ciphertext.clone()];
    }
    let part_len = usize::try_from(part_len).unwrap_or(usize::MAX);
    (0..ciphertext.len())
        .step_by(part_len)
        .map(|start| ciphertext.slice(start..(start.saturating_add(part_len)).min(ciphertext.len())))
        .collect()
}

fn check_target(bucket: &str, target: &UploadTarget, parts: u32) -> TransferResult<()> {
    let negotiation = |reason: String| TransferError::UploadNegotiation {
        bucket: bucket.to_string(),
        reason,
    };
    if target.urls.len() != parts as usize {
        return Err(negotiation(format!(
            "requested {parts} part URL(s), bridge returned {}",
            target.urls.len()
        )));
    }
    if parts > 1 && target.upload_id.is_none() {
        return Err(negotiation("multipart upload without an UploadId".into()));
    }
    Ok(())
}

async fn encrypt_source(
    bucket: &str,
    source: ByteSource,
    mut cipher: CtrTransform,
) -> TransferResult<Bytes> {
    let source_error = |reason: String| TransferError::UploadSource {
        bucket: bucket.to_string(),
        reason,
    };
    let ByteSource { size, mut stream } = source;
    let mut buf = BytesMut::with_capacity(usize::try_from(size).unwrap_or(0).min(MAX_PREALLOC));

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| source_error(e.to_string()))?;
        let start = buf.len();
        buf.extend_from_slice(&chunk);
        cipher.apply(&mut buf[start..]);
        if buf.len() as u64 > size {
            return Err(source_error(format!(
                "source yielded more than the declared {size} bytes"
            )));
        }
    }
    if buf.len() as u64 != size {
        return Err(source_error(format!(
            "source ended after {} of {size} bytes",
            buf.len()
        )));
    }
    Ok(buf.freeze())
}

fn build_commit(
    bucket: &str,
    index: String,
    hash: String,
    target: &UploadTarget,
    receipts: Vec<PutReceipt>,
) -> TransferResult<UploadCommit> {
    let parts = if target.upload_id.is_some() {
        receipts
            .into_iter()
            .enumerate()
            .map(|(i, receipt)| {
                let part_number = i as u32 + 1;
                receipt
                    .etag
                    .map(|etag| CommittedPart { part_number, etag })
                    .ok_or_else(|| TransferError::Finalize {
                        bucket: bucket.to_string(),
                        reason: format!("part {part_number} returned no ETag"),
                    })
            })
            .collect::<TransferResult<Vec<_>>>()?
    } else {
        Vec::new()
    };

    Ok(UploadCommit {
        index,
        shards: vec![ShardCommit {
            hash,
            uuid: target.uuid.clone(),
            upload_id: target.upload_id.clone(),
            parts,
        }],
    })
}
