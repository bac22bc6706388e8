use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DrivenetError, DrivenetResult};

/// Top-level client configuration (loaded from drivenet.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrivenetConfig {
    pub network: NetworkConfig,
    pub transfer: TransferConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Bridge API base URL
    pub bridge_url: String,
    /// Optional proxy prepended to legacy mirror URLs (`{proxy}/{mirror_url}`)
    pub proxy_url: Option<String>,
    /// Per-request timeout in seconds (0 = no timeout)
    pub request_timeout_secs: u64,
    /// Client name sent in the `internxt-client` header
    pub client_name: String,
    /// Client version sent in the `internxt-version` header
    pub client_version: String,
    /// Reject plaintext HTTP bridge URLs
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// How many shard responses may be opened ahead of the one being read
    pub shard_prefetch: usize,
    /// Maximum concurrent part uploads in a multipart upload
    pub upload_concurrency: usize,
    /// Number of parts used when the caller gives no hint (1 = single PUT)
    pub default_parts: u32,
    /// Granularity of PUT progress events, in bytes
    pub progress_chunk_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the local blob cache
    pub enabled: bool,
    /// Directory holding cached blobs
    pub dir: PathBuf,
    /// Cache capacity in MB
    pub capacity_mb: u64,
    /// JSON file the LRU ledger is persisted to between runs
    pub ledger_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bridge_url: "https://gateway.internxt.com/network".into(),
            proxy_url: None,
            request_timeout_secs: 60,
            client_name: "drivenet".into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
            enforce_tls: true,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            shard_prefetch: 2,
            upload_concurrency: 4,
            default_parts: 1,
            progress_chunk_bytes: 64 * 1024,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("~/.cache/drivenet/blobs"),
            capacity_mb: 512,
            ledger_file: PathBuf::from("~/.cache/drivenet/ledger.json"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl CacheConfig {
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_mb.saturating_mul(1024 * 1024)
    }
}

impl NetworkConfig {
    /// Check the bridge URL against the TLS policy.
    ///
    /// Plaintext HTTP is an error under `enforce_tls` and a warning otherwise.
    pub fn validate(&self) -> DrivenetResult<()> {
        if self.bridge_url.starts_with("http://") {
            if self.enforce_tls {
                return Err(DrivenetError::Config(format!(
                    "bridge URL uses plaintext HTTP ({}), but enforce_tls is enabled. \
                     Use an HTTPS endpoint or set network.enforce_tls = false for local development.",
                    self.bridge_url
                )));
            }
            tracing::warn!(
                bridge = %self.bridge_url,
                "bridge URL uses plaintext HTTP, credentials are transmitted unencrypted"
            );
        } else if !self.bridge_url.starts_with("https://") {
            return Err(DrivenetError::Config(format!(
                "bridge URL must be http(s): {}",
                self.bridge_url
            )));
        }
        Ok(())
    }
}

impl DrivenetConfig {
    /// Parse a TOML document.
    pub fn from_toml(s: &str) -> DrivenetResult<Self> {
        toml::from_str(s).map_err(|e| DrivenetError::Config(format!("parsing config: {e}")))
    }

    /// Load from `path`, or return defaults if the file does not exist.
    pub fn load(path: &Path) -> DrivenetResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
