//! Read-through blob cache over the download pipeline

use bytes::Bytes;
use drivenet_cache::{CacheStorage, LruCache};
use tracing::{debug, warn};

use crate::download::{DownloadOptions, DownloadRequest, Downloader};
use crate::error::TransferResult;

/// Cache key for a stored file
pub fn blob_key(bucket_id: &str, file_id: &str) -> String {
    format!("{bucket_id}-{file_id}")
}

/// Download a whole file through `cache`.
///
/// A hit returns the cached plaintext without touching the network. On a
/// miss the file is downloaded, buffered and offered to the cache. Cache
/// failures only cost the caching, never the download.
pub async fn fetch_cached<S>(
    downloader: &Downloader,
    request: &DownloadRequest,
    options: DownloadOptions,
    cache: &LruCache<Bytes, S>,
) -> TransferResult<Bytes>
where
    S: CacheStorage<Bytes>,
{
    let key = blob_key(&request.bucket_id, &request.file_id);

    match cache.get(&key).await {
        Ok(Some(data)) => {
            debug!(key = %key, bytes = data.len(), "blob cache hit");
            return Ok(data);
        }
        Ok(None) => {}
        Err(e) => warn!(key = %key, "blob cache lookup failed: {e}"),
    }

    let data = downloader.download(request, options).await?.collect_bytes().await?;

    match cache.set(&key, data.clone(), data.len() as u64).await {
        Ok(true) => debug!(key = %key, bytes = data.len(), "cached blob"),
        Ok(false) => debug!(key = %key, bytes = data.len(), "blob larger than cache capacity"),
        Err(e) => warn!(key = %key, "failed to cache blob: {e}"),
    }

    Ok(data)
}
