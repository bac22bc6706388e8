//! Ledger persistence across process restarts

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CacheError, CacheResult};

/// Serializable form of an LRU ledger: keys from least to most recently used
/// plus the aggregate size they account for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub keys: Vec<String>,
    pub current_size: u64,
}

impl LedgerSnapshot {
    /// Load a snapshot, or an empty one if the file does not exist.
    pub fn load(path: &Path) -> CacheResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| CacheError::Snapshot(format!("parsing {}: {e}", path.display())))
    }

    /// Write the snapshot atomically (temp file, then rename).
    pub fn save(&self, path: &Path) -> CacheResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CacheError::Snapshot(format!("serializing ledger: {e}")))?;

        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
