//! Download pipeline: locate → fetch shards in order → decipher → deliver
//!
//! The v2 bridge lookup is tried first; files it reports as legacy are
//! located through the older file-info and mirror-list endpoints instead.
//! Shard responses are opened up to `shard_prefetch` ahead, but their bodies
//! are always yielded in shard-index order, so the decipher sees the
//! ciphertext exactly as it was written.

use bytes::{Bytes, BytesMut};
use drivenet_core::config::{NetworkConfig, TransferConfig};
use drivenet_core::types::order_mirrors;
use drivenet_core::{FileMetadata, Mirror};
use drivenet_crypto::{derive_key, extract_iv, make_decipher_stream, CtrTransform};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use futures::TryFutureExt;
use secrecy::SecretString;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::auth::{Authorization, Credentials, KeyMaterial};
use crate::bridge::{BridgeApi, DownloadPlan, ShardTransport, TransportError};
use crate::cancel::until_cancelled;
use crate::error::{TransferError, TransferResult};
use crate::progress::{StreamProgress, TransferOptions};

/// Upper bound on the buffer `collect_bytes` reserves up front
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

/// Download lifecycle. Observers see every state after `Idle`; a pipeline
/// that has not been started is `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DownloadState {
    #[default]
    Idle,
    MetadataFetching,
    MirrorsResolving,
    Streaming,
    Decrypting,
    Complete,
    Aborted,
    Failed,
}

pub type DownloadOptions = TransferOptions<DownloadState>;

/// One file to fetch, with exactly one authorization and one key source.
#[derive(Default)]
pub struct DownloadRequest {
    pub bucket_id: String,
    pub file_id: String,
    pub token: Option<SecretString>,
    pub credentials: Option<Credentials>,
    pub mnemonic: Option<SecretString>,
    /// Raw 32-byte key, used instead of deriving one from a mnemonic
    pub encryption_key: Option<Vec<u8>>,
}

impl DownloadRequest {
    pub fn new(bucket_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            file_id: file_id.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_mnemonic(mut self, mnemonic: SecretString) -> Self {
        self.mnemonic = Some(mnemonic);
        self
    }

    pub fn with_encryption_key(mut self, key: Vec<u8>) -> Self {
        self.encryption_key = Some(key);
        self
    }
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Prefix for legacy mirror URLs
    pub proxy_url: Option<String>,
    pub shard_prefetch: usize,
}

impl DownloadSettings {
    pub fn from_config(network: &NetworkConfig, transfer: &TransferConfig) -> Self {
        Self {
            proxy_url: network.proxy_url.clone(),
            shard_prefetch: transfer.shard_prefetch,
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            proxy_url: None,
            shard_prefetch: 2,
        }
    }
}

pub struct Downloader {
    bridge: Arc<dyn BridgeApi>,
    transport: Arc<dyn ShardTransport>,
    settings: DownloadSettings,
}

impl Downloader {
    pub fn new(
        bridge: Arc<dyn BridgeApi>,
        transport: Arc<dyn ShardTransport>,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            bridge,
            transport,
            settings,
        }
    }

    /// Locate `request`'s file and return its plaintext as a stream.
    ///
    /// Errors before the first byte (configuration, metadata, mirrors, key
    /// derivation, cancellation) are returned here; errors while streaming
    /// surface as items of the returned stream.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        options: DownloadOptions,
    ) -> TransferResult<PlaintextStream> {
        match self.prepare(request, &options).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                if e.is_aborted() {
                    debug!(bucket = %request.bucket_id, file = %request.file_id, "download cancelled before streaming");
                    options.emit(DownloadState::Aborted);
                } else {
                    warn!(bucket = %request.bucket_id, file = %request.file_id, error = %e, "download failed");
                    options.emit(DownloadState::Failed);
                }
                Err(e)
            }
        }
    }

    async fn prepare(
        &self,
        request: &DownloadRequest,
        options: &DownloadOptions,
    ) -> TransferResult<PlaintextStream> {
        let bucket = request.bucket_id.as_str();
        let file = request.file_id.as_str();
        let auth = Authorization::resolve(request.token.as_ref(), request.credentials.as_ref())?;
        let keys = KeyMaterial::resolve(
            request.mnemonic.as_ref(),
            request.encryption_key.as_deref(),
        )?;
        let aborted = || TransferError::Aborted {
            bucket: bucket.to_string(),
            file: file.to_string(),
        };

        options.emit(DownloadState::MetadataFetching);
        let plan = match until_cancelled(
            &options.cancel,
            aborted,
            self.bridge.download_plan(&auth, bucket, file),
        )
        .await
        {
            Ok(plan) => {
                options.emit(DownloadState::MirrorsResolving);
                plan
            }
            Err(TransferError::LegacyFormat { .. }) => {
                info!(bucket, file, "file predates the v2 protocol, using legacy mirrors");
                until_cancelled(
                    &options.cancel,
                    aborted,
                    self.legacy_plan(&auth, bucket, file, options),
                )
                .await?
            }
            Err(e) => return Err(e),
        };

        let DownloadPlan { metadata, mirrors } = plan;
        let key_error = |source| TransferError::KeyDerivation {
            bucket: bucket.to_string(),
            source,
        };
        let iv = extract_iv(&metadata.crypto_index).map_err(key_error)?;
        let key = match keys {
            KeyMaterial::RawKey(key) => key,
            KeyMaterial::Mnemonic(mnemonic) => {
                derive_key(&mnemonic, bucket, &metadata.crypto_index).map_err(key_error)?
            }
        };

        let mut mirrors = order_mirrors(mirrors);
        let listed = mirrors.len();
        mirrors.dedup_by_key(|m| m.shard_index);
        if mirrors.len() != listed {
            debug!(bucket, file, listed, kept = mirrors.len(), "dropped duplicate shard mirrors");
        }
        if mirrors.is_empty() && metadata.size > 0 {
            return Err(TransferError::MirrorResolution {
                bucket: bucket.to_string(),
                file: file.to_string(),
                reason: "bridge returned no mirrors".into(),
            });
        }

        debug!(
            bucket,
            file,
            shards = mirrors.len(),
            size = metadata.size,
            "resolved download plan"
        );
        options.emit(DownloadState::Streaming);

        let shards = self.shard_stream(bucket, file, mirrors);
        let decipher = make_decipher_stream(&key, &iv);
        Ok(PlaintextStream::new(metadata, shards, decipher, options.clone()))
    }

    async fn legacy_plan(
        &self,
        auth: &Authorization,
        bucket: &str,
        file: &str,
        options: &DownloadOptions,
    ) -> TransferResult<DownloadPlan> {
        let info = self
            .bridge
            .file_info(auth, bucket, file)
            .inspect_ok(|_| options.emit(DownloadState::MirrorsResolving));
        let (metadata, mirrors) = futures::try_join!(info, self.bridge.mirrors(auth, bucket, file))?;

        let mirrors = match &self.settings.proxy_url {
            Some(proxy) => {
                let proxy = proxy.trim_end_matches('/');
                mirrors
                    .into_iter()
                    .map(|m| Mirror {
                        url: format!("{proxy}/{}", m.url),
                        ..m
                    })
                    .collect()
            }
            None => mirrors,
        };
        Ok(DownloadPlan { metadata, mirrors })
    }

    fn shard_stream(
        &self,
        bucket: &str,
        file: &str,
        mirrors: Vec<Mirror>,
    ) -> BoxStream<'static, TransferResult<Bytes>> {
        let transport = Arc::clone(&self.transport);
        let bucket = bucket.to_string();
        let file = file.to_string();

        stream::iter(mirrors)
            .map(move |mirror| {
                let transport = Arc::clone(&transport);
                let shard = ShardId {
                    bucket: bucket.clone(),
                    file: file.clone(),
                    index: mirror.shard_index,
                };
                async move {
                    debug!(shard = shard.index, url = %mirror.url, "opening shard");
                    let body = transport
                        .fetch(&mirror.url)
                        .await
                        .map_err(|e| shard.error(e))?;
                    Ok::<_, TransferError>(body.map_err(move |e| shard.error(e)).boxed())
                }
            })
            .buffered(self.settings.shard_prefetch.max(1))
            .try_flatten()
            .boxed()
    }
}

struct ShardId {
    bucket: String,
    file: String,
    index: u32,
}

impl ShardId {
    fn error(&self, e: TransportError) -> TransferError {
        TransferError::NetworkShard {
            bucket: self.bucket.clone(),
            file: self.file.clone(),
            shard: self.index,
            reason: e.to_string(),
        }
    }
}

/// Plaintext of one file, yielded in order.
///
/// After cancellation the stream yields one `Aborted` error and then ends.
/// A ciphertext whose length differs from the declared size ends with a
/// `Decryption` error.
pub struct PlaintextStream {
    metadata: FileMetadata,
    inner: BoxStream<'static, TransferResult<Bytes>>,
}

impl PlaintextStream {
    fn new(
        metadata: FileMetadata,
        shards: BoxStream<'static, TransferResult<Bytes>>,
        decipher: CtrTransform,
        options: DownloadOptions,
    ) -> Self {
        let state = Decrypting {
            bucket: metadata.bucket_id.clone(),
            file: metadata.file_id.clone(),
            expected: metadata.size,
            progress: StreamProgress::new(metadata.size, options.progress.clone()),
            shards,
            decipher,
            options,
            started: false,
            finished: false,
        };
        let inner = stream::unfold(state, |mut state| async move {
            let item = state.next_chunk().await?;
            Some((item, state))
        })
        .fuse()
        .boxed();
        Self { metadata, inner }
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    /// Buffer the whole plaintext.
    pub async fn collect_bytes(mut self) -> TransferResult<Bytes> {
        let capacity = usize::try_from(self.metadata.size)
            .unwrap_or(usize::MAX)
            .min(MAX_PREALLOC);
        let mut buf = BytesMut::with_capacity(capacity);
        while let Some(chunk) = self.inner.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Write the plaintext into `sink`, returning the number of bytes written.
    pub async fn pipe_to<W>(mut self, sink: &mut W) -> TransferResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.inner.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }
}

impl Stream for PlaintextStream {
    type Item = TransferResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

struct Decrypting {
    bucket: String,
    file: String,
    expected: u64,
    progress: StreamProgress,
    shards: BoxStream<'static, TransferResult<Bytes>>,
    decipher: CtrTransform,
    options: DownloadOptions,
    started: bool,
    finished: bool,
}

impl Decrypting {
    async fn next_chunk(&mut self) -> Option<TransferResult<Bytes>> {
        if self.finished {
            return None;
        }

        let next = tokio::select! {
            biased;
            _ = self.options.cancel.cancelled() => None,
            item = self.shards.next() => Some(item),
        };
        let Some(item) = next else {
            return Some(Err(self.abort()));
        };

        match item {
            Some(Ok(chunk)) => {
                if !self.started {
                    self.started = true;
                    self.options.emit(DownloadState::Decrypting);
                }
                let plain = self.decipher.update(&chunk);
                if self.decipher.processed() > self.expected {
                    let reason = format!(
                        "ciphertext exceeds the declared {} bytes",
                        self.expected
                    );
                    return Some(Err(self.fail(reason)));
                }
                self.progress.advance(plain.len() as u64);
                Some(Ok(plain))
            }
            Some(Err(e)) => {
                warn!(bucket = %self.bucket, file = %self.file, error = %e, "download failed");
                self.finish(DownloadState::Failed);
                Some(Err(e))
            }
            None => {
                let processed = self.decipher.processed();
                if processed != self.expected {
                    let reason = format!(
                        "ciphertext ended after {processed} of {} bytes",
                        self.expected
                    );
                    return Some(Err(self.fail(reason)));
                }
                info!(bucket = %self.bucket, file = %self.file, bytes = processed, "download complete");
                self.finish(DownloadState::Complete);
                None
            }
        }
    }

    /// Stop for good. Dropping the shard stream releases any open responses.
    fn finish(&mut self, state: DownloadState) {
        self.finished = true;
        self.shards = stream::empty().boxed();
        self.options.emit(state);
    }

    fn abort(&mut self) -> TransferError {
        debug!(bucket = %self.bucket, file = %self.file, "download cancelled mid-stream");
        self.finish(DownloadState::Aborted);
        TransferError::Aborted {
            bucket: self.bucket.clone(),
            file: self.file.clone(),
        }
    }

    fn fail(&mut self, reason: String) -> TransferError {
        warn!(bucket = %self.bucket, file = %self.file, %reason, "decryption failed");
        self.finish(DownloadState::Failed);
        TransferError::Decryption {
            bucket: self.bucket.clone(),
            file: self.file.clone(),
            reason,
        }
    }
}
