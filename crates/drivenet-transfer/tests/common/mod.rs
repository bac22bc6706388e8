//! In-memory bridge and shard transport shared by the pipeline tests.
//!
//! Shards are registered under fake mirror URLs; uploads land in memory and are
//! published as downloadable files on commit, so a file can make the full
//! upload-then-download trip without a network.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use drivenet_core::{FileMetadata, Mirror};
use drivenet_crypto::{derive_key, extract_iv, make_cipher_stream, make_decipher_stream};
use drivenet_transfer::bridge::{
    BridgeApi, ByteStream, DownloadPlan, PutProgressFn, PutReceipt, ShardTransport,
    TransportError, UploadCommit, UploadTarget,
};
use drivenet_transfer::{Authorization, TransferError, TransferResult};
use futures::stream::{self, StreamExt};
use secrecy::SecretString;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BUCKET: &str = "6241b3b2a3a8e0001a2f3c4d";
pub const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon \
                            abandon abandon abandon abandon abandon about";
pub const COMMITTED_FILE: &str = "file-0001";

const CHUNK: usize = 1000;

pub fn mnemonic() -> SecretString {
    SecretString::from(MNEMONIC)
}

pub fn fixed_index() -> Vec<u8> {
    (0u8..32).collect()
}

pub fn plaintext(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn encrypt(plain: &[u8], index: &[u8]) -> Vec<u8> {
    let key = derive_key(&mnemonic(), BUCKET, index).unwrap();
    let iv = extract_iv(index).unwrap();
    make_cipher_stream(&key, &iv).update(plain).to_vec()
}

pub fn decrypt(cipher: &[u8], index: &[u8]) -> Vec<u8> {
    let key = derive_key(&mnemonic(), BUCKET, index).unwrap();
    let iv = extract_iv(index).unwrap();
    make_decipher_stream(&key, &iv).update(cipher).to_vec()
}

/// Record of everything observed through a callback
pub fn recorder<T: Send + 'static>() -> (Arc<dyn Fn(T) + Send + Sync>, Arc<Mutex<Vec<T>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (Arc::new(move |v| sink.lock().unwrap().push(v)), seen)
}

/// Records `(total, transferred)` pairs in the order the callback receives them.
pub fn progress_recorder() -> (
    drivenet_transfer::ProgressFn,
    Arc<Mutex<Vec<(u64, u64)>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (
        Arc::new(move |total, done| sink.lock().unwrap().push((total, done))),
        seen,
    )
}

#[derive(Clone, Default)]
pub struct FakeShard {
    pub chunks: Vec<Bytes>,
    pub open_delay: Duration,
    pub chunk_delay: Duration,
    pub status: Option<u16>,
}

struct FakeFile {
    metadata: FileMetadata,
    mirrors: Vec<Mirror>,
    legacy: bool,
}

#[derive(Default)]
pub struct FakeNetwork {
    files: Mutex<HashMap<String, FakeFile>>,
    shards: Mutex<HashMap<String, FakeShard>>,
    calls: Mutex<Vec<String>>,
    pub metadata_failure: Mutex<Option<String>>,
    pub negotiation_failure: Mutex<Option<String>>,
    pub part_delays: Mutex<Vec<Duration>>,
    pub failing_part: Mutex<Option<(usize, u16)>>,
    pub put_bodies: Mutex<BTreeMap<usize, Bytes>>,
    pub commits: Mutex<Vec<UploadCommit>>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `plain` encrypted under the fixed index, split into shards of
    /// `shard_sizes` bytes. Mirrors are listed in reverse shard order.
    pub fn add_file(&self, file_id: &str, plain: &[u8], shard_sizes: &[usize], legacy: bool) -> Vec<String> {
        let index = fixed_index();
        let cipher = encrypt(plain, &index);
        assert_eq!(shard_sizes.iter().sum::<usize>(), cipher.len());

        let mut urls = Vec::new();
        let mut offset = 0;
        for (i, len) in shard_sizes.iter().enumerate() {
            let url = format!("https://mirror.test/{file_id}/{i}");
            let shard = &cipher[offset..offset + len];
            offset += len;
            self.shards.lock().unwrap().insert(
                url.clone(),
                FakeShard {
                    chunks: shard.chunks(CHUNK).map(Bytes::copy_from_slice).collect(),
                    ..Default::default()
                },
            );
            urls.push(url);
        }

        let mirrors = urls
            .iter()
            .enumerate()
            .rev()
            .map(|(i, url)| Mirror {
                url: url.clone(),
                shard_index: i as u32,
            })
            .collect();
        self.files.lock().unwrap().insert(
            file_id.to_string(),
            FakeFile {
                metadata: FileMetadata {
                    bucket_id: BUCKET.into(),
                    file_id: file_id.into(),
                    size: plain.len() as u64,
                    mime_type: "application/octet-stream".into(),
                    name: format!("{file_id}.bin"),
                    created_at: "2024-01-01T00:00:00Z".into(),
                    crypto_index: index,
                    hmac: None,
                },
                mirrors,
                legacy,
            },
        );
        urls
    }

    pub fn shard_mut(&self, url: &str, edit: impl FnOnce(&mut FakeShard)) {
        let mut shards = self.shards.lock().unwrap();
        edit(shards.get_mut(url).expect("unknown shard url"));
    }

    /// Serve every registered shard under `{proxy}/{url}` as well.
    pub fn mirror_through_proxy(&self, proxy: &str) {
        let mut shards = self.shards.lock().unwrap();
        let proxied: Vec<_> = shards
            .iter()
            .map(|(url, shard)| (format!("{proxy}/{url}"), shard.clone()))
            .collect();
        shards.extend(proxied);
    }

    pub fn declare_size(&self, file_id: &str, size: u64) {
        let mut files = self.files.lock().unwrap();
        files.get_mut(file_id).unwrap().metadata.size = size;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BridgeApi for FakeNetwork {
    async fn download_plan(
        &self,
        _auth: &Authorization,
        bucket_id: &str,
        file_id: &str,
    ) -> TransferResult<DownloadPlan> {
        self.record(format!("v2:{file_id}"));
        if let Some(reason) = self.metadata_failure.lock().unwrap().clone() {
            return Err(TransferError::MetadataFetch {
                bucket: bucket_id.into(),
                file: file_id.into(),
                reason,
            });
        }
        let files = self.files.lock().unwrap();
        let file = files.get(file_id).ok_or_else(|| TransferError::MetadataFetch {
            bucket: bucket_id.into(),
            file: file_id.into(),
            reason: "HTTP 404: not found".into(),
        })?;
        if file.legacy {
            return Err(TransferError::LegacyFormat {
                bucket: bucket_id.into(),
                file: file_id.into(),
            });
        }
        Ok(DownloadPlan {
            metadata: file.metadata.clone(),
            mirrors: file.mirrors.clone(),
        })
    }

    async fn file_info(
        &self,
        _auth: &Authorization,
        bucket_id: &str,
        file_id: &str,
    ) -> TransferResult<FileMetadata> {
        self.record(format!("info:{file_id}"));
        let files = self.files.lock().unwrap();
        files
            .get(file_id)
            .map(|f| f.metadata.clone())
            .ok_or_else(|| TransferError::MetadataFetch {
                bucket: bucket_id.into(),
                file: file_id.into(),
                reason: "HTTP 404: not found".into(),
            })
    }

    async fn mirrors(
        &self,
        _auth: &Authorization,
        bucket_id: &str,
        file_id: &str,
    ) -> TransferResult<Vec<Mirror>> {
        self.record(format!("mirrors:{file_id}"));
        let files = self.files.lock().unwrap();
        files
            .get(file_id)
            .map(|f| f.mirrors.clone())
            .ok_or_else(|| TransferError::MirrorResolution {
                bucket: bucket_id.into(),
                file: file_id.into(),
                reason: "HTTP 404: not found".into(),
            })
    }

    async fn start_upload(
        &self,
        _auth: &Authorization,
        bucket_id: &str,
        size: u64,
        parts: u32,
    ) -> TransferResult<UploadTarget> {
        self.record(format!("start:{size}:{parts}"));
        if let Some(reason) = self.negotiation_failure.lock().unwrap().clone() {
            return Err(TransferError::UploadNegotiation {
                bucket: bucket_id.into(),
                reason,
            });
        }
        Ok(UploadTarget {
            uuid: "slot-uuid".into(),
            urls: (0..parts).map(|i| format!("https://put.test/{i}")).collect(),
            upload_id: (parts > 1).then(|| "upload-1".to_string()),
        })
    }

    async fn finish_upload(
        &self,
        _auth: &Authorization,
        _bucket_id: &str,
        commit: &UploadCommit,
    ) -> TransferResult<String> {
        self.record("finish".into());
        self.commits.lock().unwrap().push(commit.clone());

        // publish the upload as a downloadable file, one shard per part
        let bodies: Vec<Bytes> = self.put_bodies.lock().unwrap().values().cloned().collect();
        let mut mirrors = Vec::new();
        for (i, body) in bodies.iter().enumerate() {
            let url = format!("https://mirror.test/{COMMITTED_FILE}/{i}");
            self.shards.lock().unwrap().insert(
                url.clone(),
                FakeShard {
                    chunks: vec![body.clone()],
                    ..Default::default()
                },
            );
            mirrors.push(Mirror {
                url,
                shard_index: i as u32,
            });
        }
        self.files.lock().unwrap().insert(
            COMMITTED_FILE.into(),
            FakeFile {
                metadata: FileMetadata {
                    bucket_id: BUCKET.into(),
                    file_id: COMMITTED_FILE.into(),
                    size: bodies.iter().map(|b| b.len() as u64).sum(),
                    mime_type: String::new(),
                    name: String::new(),
                    created_at: String::new(),
                    crypto_index: hex::decode(&commit.index).unwrap(),
                    hmac: None,
                },
                mirrors,
                legacy: false,
            },
        );
        Ok(COMMITTED_FILE.into())
    }
}

#[async_trait]
impl ShardTransport for FakeNetwork {
    async fn fetch(&self, url: &str) -> Result<ByteStream, TransportError> {
        self.record(format!("fetch:{url}"));
        let shard = self
            .shards
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::Status {
                status: 404,
                message: "no such shard".into(),
            })?;

        if !shard.open_delay.is_zero() {
            tokio::time::sleep(shard.open_delay).await;
        }
        self.record(format!("opened:{url}"));
        if let Some(status) = shard.status {
            return Err(TransportError::Status {
                status,
                message: "mirror unavailable".into(),
            });
        }

        let delay = shard.chunk_delay;
        Ok(stream::iter(shard.chunks)
            .then(move |chunk| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(chunk)
            })
            .boxed())
    }

    async fn put(
        &self,
        url: &str,
        body: Bytes,
        progress: PutProgressFn,
    ) -> Result<PutReceipt, TransportError> {
        let part: usize = url.rsplit('/').next().unwrap().parse().unwrap();
        self.record(format!("put:{part}"));
        let delay = self
            .part_delays
            .lock()
            .unwrap()
            .get(part)
            .copied()
            .unwrap_or_default();

        let total = body.len() as u64;
        for step in 1..=4u64 {
            tokio::time::sleep(delay / 4).await;
            progress(total * step / 4, total);
        }

        if let Some((failing, status)) = *self.failing_part.lock().unwrap() {
            if failing == part {
                return Err(TransportError::Status {
                    status,
                    message: "storage node rejected the part".into(),
                });
            }
        }

        self.put_bodies.lock().unwrap().insert(part, body);
        Ok(PutReceipt {
            etag: Some(format!("etag-{part}")),
        })
    }
}
