//! drivenet-cache: bounded local cache for derived artifacts (previews, thumbnails, blobs)
//!
//! [`LruCache`] keeps the recency ledger and the aggregate size in memory and
//! delegates content to an injected [`CacheStorage`]. The ledger decides what
//! is evicted and when; the store holds the bytes.

pub mod error;
pub mod lru;
pub mod operator;
pub mod snapshot;
pub mod storage;

pub use error::{CacheError, CacheResult};
pub use lru::LruCache;
pub use operator::{build_fs_operator, OperatorStorage};
pub use snapshot::LedgerSnapshot;
pub use storage::{CacheStorage, MemoryStorage};
