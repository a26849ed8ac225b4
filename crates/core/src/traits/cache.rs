//! Remote cache backing-store trait

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// External cache backing store (optional remote tier).
///
/// Values are opaque byte strings; the response cache handles
/// serialization. Implementations should map transport failures to
/// [`crate::Error::CacheUnavailable`] so callers can degrade to local-only
/// caching.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}
