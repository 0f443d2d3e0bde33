//! Durable record store trait definition.

use async_trait::async_trait;

use fieldsync_common::Result;

/// Key-value store that keeps queue records across process restarts.
///
/// Values are opaque bytes; the sync layer owns their encoding.
/// Implementations must make `put` durable before returning.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Fetch a record.
    ///
    /// # Returns
    /// `None` if no record is stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a record.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove a record.
    ///
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Every stored record as `(key, value)` pairs, in no particular order.
    async fn list_all(&self) -> Result<Vec<(String, Vec<u8>)>>;
}
