//! reqwest implementation of the bridge and shard transport

use async_trait::async_trait;
use bytes::Bytes;
use drivenet_core::config::{DrivenetConfig, NetworkConfig};
use drivenet_core::{FileMetadata, Hmac, Mirror};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, ETAG};
use reqwest::{Client, Method, RequestBuilder};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::auth::Authorization;
use crate::bridge::{
    BridgeApi, ByteStream, DownloadPlan, PutProgressFn, PutReceipt, ShardTransport,
    TransportError, UploadCommit, UploadTarget,
};
use crate::download::{DownloadSettings, Downloader};
use crate::error::{TransferError, TransferResult};
use crate::upload::{UploadSettings, Uploader};

/// Files below this v2 protocol version are served by the legacy endpoints
const MIN_V2_VERSION: u32 = 2;

/// Legacy mirror listing page
const LEGACY_MIRROR_LIMIT: u32 = 3;

/// Longest error body quoted back in error messages
const ERROR_BODY_LIMIT: usize = 256;

/// Bridge client over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpBridge {
    client: Client,
    base: String,
    request_timeout: Option<Duration>,
    progress_chunk: usize,
}

impl HttpBridge {
    pub fn new(network: &NetworkConfig, progress_chunk_bytes: usize) -> TransferResult<Self> {
        network
            .validate()
            .map_err(|e| TransferError::Configuration(e.to_string()))?;

        let header = |value: &str| {
            HeaderValue::from_str(value)
                .map_err(|e| TransferError::Configuration(format!("invalid header value {value:?}: {e}")))
        };
        let mut default_headers = HeaderMap::new();
        default_headers.insert("internxt-client", header(&network.client_name)?);
        default_headers.insert("internxt-version", header(&network.client_version)?);

        let client = Client::builder()
            .default_headers(default_headers)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransferError::Configuration(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            base: network.bridge_url.trim_end_matches('/').to_string(),
            request_timeout: (network.request_timeout_secs > 0)
                .then(|| Duration::from_secs(network.request_timeout_secs)),
            progress_chunk: progress_chunk_bytes.max(1),
        })
    }

    /// Bridge request with auth and the per-request timeout applied.
    ///
    /// Shard bodies are not subject to the timeout; they can be arbitrarily
    /// large.
    fn bridge_request(&self, method: Method, path: &str, auth: &Authorization) -> RequestBuilder {
        let mut request = self.client.request(method, format!("{}{path}", self.base));
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }
        match auth {
            Authorization::Bearer(token) => request.bearer_auth(token.expose_secret()),
            Authorization::Basic { user, secret } => {
                request.basic_auth(user, Some(secret.expose_secret()))
            }
        }
    }
}

/// Build both pipelines over one HTTP bridge.
pub fn http_pipelines(config: &DrivenetConfig) -> TransferResult<(Downloader, Uploader)> {
    let bridge = Arc::new(HttpBridge::new(
        &config.network,
        config.transfer.progress_chunk_bytes,
    )?);
    let downloader = Downloader::new(
        bridge.clone(),
        bridge.clone(),
        DownloadSettings::from_config(&config.network, &config.transfer),
    );
    let uploader = Uploader::new(
        bridge.clone(),
        bridge,
        UploadSettings::from_config(&config.transfer),
    );
    Ok((downloader, uploader))
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, String> {
    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("HTTP {}: {}", status.as_u16(), clip(&body)));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| format!("decoding response: {e}"))
}

fn clip(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((at, _)) => &body[..at],
        None => body,
    }
}

// ── Wire formats ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct V2FileResponse {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    index: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    created: String,
    #[serde(default)]
    mimetype: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    shards: Vec<WirePointer>,
}

#[derive(Debug, Deserialize)]
struct WireFileInfo {
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    id: String,
    index: String,
    size: u64,
    #[serde(default)]
    created: String,
    #[serde(default)]
    mimetype: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    hmac: Option<Hmac>,
}

#[derive(Debug, Deserialize)]
struct WirePointer {
    index: u32,
    url: String,
}

#[derive(Debug, Serialize)]
struct StartUploadBody {
    uploads: Vec<StartUploadEntry>,
}

#[derive(Debug, Serialize)]
struct StartUploadEntry {
    index: u32,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct StartUploadResponse {
    uploads: Vec<WireUploadSlot>,
}

#[derive(Debug, Deserialize)]
struct WireUploadSlot {
    uuid: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    urls: Option<Vec<String>>,
    #[serde(rename = "UploadId", default)]
    upload_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FinishUploadResponse {
    id: String,
}

fn decode_index(index: &str) -> Result<Vec<u8>, String> {
    let bytes = hex::decode(index).map_err(|e| format!("crypto index is not hex: {e}"))?;
    if bytes.len() < drivenet_crypto::IV_SIZE {
        return Err(format!("crypto index too short: {} bytes", bytes.len()));
    }
    Ok(bytes)
}

fn mirrors_from(pointers: Vec<WirePointer>) -> Vec<Mirror> {
    pointers
        .into_iter()
        .map(|p| Mirror {
            url: p.url,
            shard_index: p.index,
        })
        .collect()
}

// ── Bridge endpoints ─────────────────────────────────────────────────────

#[async_trait]
impl BridgeApi for HttpBridge {
    async fn download_plan(
        &self,
        auth: &Authorization,
        bucket_id: &str,
        file_id: &str,
    ) -> TransferResult<DownloadPlan> {
        let fetch_error = |reason: String| TransferError::MetadataFetch {
            bucket: bucket_id.to_string(),
            file: file_id.to_string(),
            reason,
        };
        let path = format!("/v2/buckets/{bucket_id}/files/{file_id}/mirrors");
        let response: V2FileResponse =
            send_json(self.bridge_request(Method::GET, &path, auth))
                .await
                .map_err(fetch_error)?;

        if response.version < MIN_V2_VERSION {
            debug!(bucket = bucket_id, file = file_id, version = response.version, "legacy file");
            return Err(TransferError::LegacyFormat {
                bucket: bucket_id.to_string(),
                file: file_id.to_string(),
            });
        }

        let crypto_index = decode_index(&response.index).map_err(fetch_error)?;
        let metadata = FileMetadata {
            bucket_id: if response.bucket.is_empty() {
                bucket_id.to_string()
            } else {
                response.bucket
            },
            file_id: file_id.to_string(),
            size: response.size,
            mime_type: response.mimetype,
            name: response.filename,
            created_at: response.created,
            crypto_index,
            hmac: None,
        };
        Ok(DownloadPlan {
            metadata,
            mirrors: mirrors_from(response.shards),
        })
    }

    async fn file_info(
        &self,
        auth: &Authorization,
        bucket_id: &str,
        file_id: &str,
    ) -> TransferResult<FileMetadata> {
        let fetch_error = |reason: String| TransferError::MetadataFetch {
            bucket: bucket_id.to_string(),
            file: file_id.to_string(),
            reason,
        };
        let path = format!("/buckets/{bucket_id}/files/{file_id}/info");
        let info: WireFileInfo = send_json(self.bridge_request(Method::GET, &path, auth))
            .await
            .map_err(fetch_error)?;

        Ok(FileMetadata {
            bucket_id: if info.bucket.is_empty() {
                bucket_id.to_string()
            } else {
                info.bucket
            },
            file_id: if info.id.is_empty() {
                file_id.to_string()
            } else {
                info.id
            },
            size: info.size,
            mime_type: info.mimetype,
            name: info.filename,
            created_at: info.created,
            crypto_index: decode_index(&info.index).map_err(fetch_error)?,
            hmac: info.hmac,
        })
    }

    async fn mirrors(
        &self,
        auth: &Authorization,
        bucket_id: &str,
        file_id: &str,
    ) -> TransferResult<Vec<Mirror>> {
        let path =
            format!("/buckets/{bucket_id}/files/{file_id}?limit={LEGACY_MIRROR_LIMIT}&skip=0");
        let pointers: Vec<WirePointer> = send_json(self.bridge_request(Method::GET, &path, auth))
            .await
            .map_err(|reason| TransferError::MirrorResolution {
                bucket: bucket_id.to_string(),
                file: file_id.to_string(),
                reason,
            })?;
        Ok(mirrors_from(pointers))
    }

    async fn start_upload(
        &self,
        auth: &Authorization,
        bucket_id: &str,
        size: u64,
        parts: u32,
    ) -> TransferResult<UploadTarget> {
        let negotiation = |reason: String| TransferError::UploadNegotiation {
            bucket: bucket_id.to_string(),
            reason,
        };
        let path = format!("/v2/buckets/{bucket_id}/files/start?multiparts={parts}");
        let body = StartUploadBody {
            uploads: vec![StartUploadEntry { index: 0, size }],
        };
        let response: StartUploadResponse =
            send_json(self.bridge_request(Method::POST, &path, auth).json(&body))
                .await
                .map_err(negotiation)?;

        let slot = response
            .uploads
            .into_iter()
            .next()
            .ok_or_else(|| negotiation("bridge returned no upload slot".into()))?;
        let urls = match (slot.urls, slot.url) {
            (Some(urls), _) if !urls.is_empty() => urls,
            (_, Some(url)) => vec![url],
            _ => return Err(negotiation("upload slot carries no URL".into())),
        };
        Ok(UploadTarget {
            uuid: slot.uuid,
            urls,
            upload_id: slot.upload_id,
        })
    }

    async fn finish_upload(
        &self,
        auth: &Authorization,
        bucket_id: &str,
        commit: &UploadCommit,
    ) -> TransferResult<String> {
        let path = format!("/v2/buckets/{bucket_id}/files/finish");
        let response: FinishUploadResponse =
            send_json(self.bridge_request(Method::POST, &path, auth).json(commit))
                .await
                .map_err(|reason| TransferError::Finalize {
                    bucket: bucket_id.to_string(),
                    reason,
                })?;
        Ok(response.id)
    }
}

// ── Shard transport ──────────────────────────────────────────────────────

#[async_trait]
impl ShardTransport for HttpBridge {
    async fn fetch(&self, url: &str) -> Result<ByteStream, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: clip(&body).to_string(),
            });
        }
        Ok(response
            .bytes_stream()
            .map_err(|e| TransportError::Body(e.to_string()))
            .boxed())
    }

    async fn put(
        &self,
        url: &str,
        body: Bytes,
        progress: PutProgressFn,
    ) -> Result<PutReceipt, TransportError> {
        let total = body.len() as u64;
        let chunk = self.progress_chunk;
        let pieces: Vec<Bytes> = (0..body.len())
            .step_by(chunk)
            .map(|start| body.slice(start..(start + chunk).min(body.len())))
            .collect();

        // counts bytes as the connection pulls them from the body
        let reporter = Arc::clone(&progress);
        let mut sent = 0u64;
        let body_stream = stream::iter(pieces).map(move |piece| {
            sent += piece.len() as u64;
            reporter(sent, total);
            Ok::<_, std::io::Error>(piece)
        });

        progress(0, total);
        let response = self
            .client
            .put(url)
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(body_stream))
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: clip(&body).to_string(),
            });
        }
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        progress(total, total);
        Ok(PutReceipt { etag })
    }
}
