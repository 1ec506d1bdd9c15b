//! The store protocol: keyed byte persistence under the memory overlays.

use async_trait::async_trait;

use crate::error::StoreError;

/// Concurrency-safe keyed byte storage.
///
/// Implementations:
/// - `MemoryStore` (axon-store-memory): `HashMap` behind a `RwLock`
/// - `FsStore` (axon-store-fs): one file per key, survives restarts
///
/// The trait is deliberately minimal: CRUD + list + an advisory existence
/// check. Implementations MUST serialize access internally and MUST return
/// owned copies from [`get`](Store::get), so callers never alias the
/// backing buffer.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a copy of the value at `key`.
    /// Returns `None` if the key doesn't exist (not an error).
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store a copy of `value` at `key`. Creates or fully overwrites.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Point-in-time snapshot of all keys. Order is undefined.
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Whether `key` is currently present. Advisory: may race with a
    /// concurrent delete.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}
