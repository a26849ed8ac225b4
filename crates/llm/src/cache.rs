//! Hybrid response cache
//!
//! Two tiers: a bounded in-process map with FIFO eviction and lazy TTL
//! expiry, plus an optional remote backing store. Remote failures degrade to
//! local-only caching and never surface to the caller. Identical concurrent
//! misses are collapsed into one upstream computation (single flight).

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
// tokio's Instant so TTL expiry is testable under a paused clock.
use tokio::time::Instant;

use companion_core::{CacheStore, Error, Message, Result};

use crate::types::LlmResponse;

struct LocalTier {
    entries: HashMap<String, (LlmResponse, Instant)>,
    // Insertion order for FIFO eviction
    order: VecDeque<String>,
}

/// Hybrid local/remote cache for generation responses.
pub struct ResponseCache {
    local: Mutex<LocalTier>,
    remote: Option<Arc<dyn CacheStore>>,
    ttl: Duration,
    max_entries: usize,
    in_flight: DashMap<String, Arc<OnceCell<LlmResponse>>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            local: Mutex::new(LocalTier {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            remote: None,
            ttl,
            max_entries: max_entries.max(1),
            in_flight: DashMap::new(),
        }
    }

    pub fn with_remote(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.remote = Some(store);
        self
    }

    /// Deterministic fingerprint over everything that affects the response.
    pub fn key_for(
        conversation: &[Message],
        provider: &str,
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> String {
        let mut hasher = Sha256::new();
        for message in conversation {
            hasher.update(message.role.to_string().as_bytes());
            hasher.update([0x1f]);
            hasher.update(message.content.as_bytes());
            hasher.update([0x1e]);
        }
        hasher.update(provider.as_bytes());
        hasher.update([0x1f]);
        hasher.update(model.as_bytes());
        hasher.update([0x1f]);
        hasher.update(max_tokens.to_le_bytes());
        hasher.update(temperature.to_le_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Look up a response, local tier first, then remote. Remote hits are
    /// promoted into the local tier.
    pub async fn get(&self, key: &str) -> Option<LlmResponse> {
        {
            let mut local = self.local.lock();
            match local.entries.get(key) {
                Some((_, expires)) if *expires <= Instant::now() => {
                    local.entries.remove(key);
                    local.order.retain(|k| k != key);
                }
                Some((response, _)) => return Some(response.clone()),
                None => {}
            }
        }

        let remote = self.remote.as_ref()?;
        match remote.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<LlmResponse>(&bytes) {
                Ok(response) => {
                    self.insert_local(key, response.clone());
                    Some(response)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "discarding undecodable remote cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(Error::CacheUnavailable(reason)) => {
                tracing::warn!(reason, "remote cache unavailable, serving local tier only");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "remote cache lookup failed");
                None
            }
        }
    }

    /// Write through to both tiers. Remote failures are logged and ignored.
    pub async fn set(&self, key: &str, response: &LlmResponse) {
        self.insert_local(key, response.clone());

        if let Some(remote) = &self.remote {
            match serde_json::to_vec(response) {
                Ok(bytes) => {
                    if let Err(err) = remote.set(key, &bytes, self.ttl).await {
                        tracing::warn!(error = %err, "remote cache write failed");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "failed to encode cache entry"),
            }
        }
    }

    /// Fetch from cache or run `compute` exactly once for this key across
    /// concurrent callers. Returns the response and whether it came from
    /// cache (or from another caller's in-flight computation).
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<(LlmResponse, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LlmResponse>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok((hit, true));
        }

        let cell = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut computed = false;
        let result = cell
            .get_or_try_init(|| {
                computed = true;
                compute()
            })
            .await
            .cloned();

        // Late arrivals create a fresh cell; the cache itself now holds the
        // value for them. A dropped initializer leaves no poisoned state.
        self.in_flight.remove(key);

        let response = result?;
        // Degraded offline replies stay out of the cache so a recovered
        // provider is consulted on the next request.
        if computed && !response.degraded {
            self.set(key, &response).await;
        }
        Ok((response, !computed))
    }

    /// Drop the entire local tier. The remote tier, when present, expires
    /// through its own TTLs.
    pub fn clear_local(&self) {
        let mut local = self.local.lock();
        local.entries.clear();
        local.order.clear();
    }

    fn insert_local(&self, key: &str, response: LlmResponse) {
        let mut local = self.local.lock();
        let expires = Instant::now() + self.ttl;
        if local.entries.insert(key.to_string(), (response, expires)).is_none() {
            local.order.push_back(key.to_string());
        }
        while local.entries.len() > self.max_entries {
            match local.order.pop_front() {
                Some(oldest) => {
                    local.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    #[cfg(test)]
    fn local_len(&self) -> usize {
        self.local.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn response(content: &str) -> LlmResponse {
        LlmResponse {
            content: content.to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            tokens_used: 7,
            latency_ms: 120,
            cached: false,
            degraded: false,
        }
    }

    #[test]
    fn key_is_sensitive_to_all_inputs() {
        let conv = vec![Message::user("hi")];
        let base = ResponseCache::key_for(&conv, "openai", "gpt-4o-mini", 256, 0.7);
        assert_eq!(
            base,
            ResponseCache::key_for(&conv, "openai", "gpt-4o-mini", 256, 0.7)
        );
        assert_ne!(
            base,
            ResponseCache::key_for(&conv, "ollama", "gpt-4o-mini", 256, 0.7)
        );
        assert_ne!(
            base,
            ResponseCache::key_for(&conv, "openai", "gpt-4o", 256, 0.7)
        );
        assert_ne!(
            base,
            ResponseCache::key_for(&conv, "openai", "gpt-4o-mini", 512, 0.7)
        );
        assert_ne!(
            base,
            ResponseCache::key_for(&conv, "openai", "gpt-4o-mini", 256, 0.8)
        );
        let other = vec![Message::user("hi there")];
        assert_ne!(
            base,
            ResponseCache::key_for(&other, "openai", "gpt-4o-mini", 256, 0.7)
        );
    }

    #[test]
    fn message_boundaries_are_unambiguous() {
        let a = vec![Message::user("ab"), Message::user("c")];
        let b = vec![Message::user("a"), Message::user("bc")];
        assert_ne!(
            ResponseCache::key_for(&a, "p", "m", 1, 0.0),
            ResponseCache::key_for(&b, "p", "m", 1, 0.0)
        );
    }

    #[tokio::test]
    async fn local_hit_roundtrip() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);
        cache.set("k1", &response("hello")).await;
        assert_eq!(cache.get("k1").await.unwrap().content, "hello");
        assert!(cache.get("k2").await.is_none());
    }

    #[tokio::test]
    async fn fifo_eviction_drops_oldest() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.set("k1", &response("a")).await;
        cache.set("k2", &response("b")).await;
        cache.set("k3", &response("c")).await;
        assert!(cache.get("k1").await.is_none());
        assert!(cache.get("k2").await.is_some());
        assert!(cache.get("k3").await.is_some());
        assert_eq!(cache.local_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_dropped_lazily() {
        let cache = ResponseCache::new(Duration::from_secs(10), 10);
        cache.set("k1", &response("a")).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("k1").await.is_none());
        assert_eq!(cache.local_len(), 0);
    }

    #[tokio::test]
    async fn single_flight_collapses_concurrent_misses() {
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60), 10));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("same-key", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(response("computed"))
                    })
                    .await
            }));
        }

        let mut from_cache = 0;
        for handle in handles {
            let (resp, cached) = handle.await.unwrap().unwrap();
            assert_eq!(resp.content, "computed");
            if cached {
                from_cache += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(from_cache, 7);
    }

    #[tokio::test]
    async fn failed_computation_does_not_poison_key() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);
        let err: Result<(LlmResponse, bool)> = cache
            .get_or_compute("k", || async {
                Err(Error::provider("openai", "boom"))
            })
            .await;
        assert!(err.is_err());

        let (resp, cached) = cache
            .get_or_compute("k", || async { Ok(response("recovered")) })
            .await
            .unwrap();
        assert_eq!(resp.content, "recovered");
        assert!(!cached);
    }

    struct FlakyStore {
        available: std::sync::atomic::AtomicBool,
        inner: DashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl CacheStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            if !self.available.load(Ordering::SeqCst) {
                return Err(Error::CacheUnavailable("connection refused".to_string()));
            }
            Ok(self.inner.get(key).map(|v| v.clone()))
        }

        async fn set(&self, key: &str, value: &[u8], _ttl: Duration) -> Result<()> {
            if !self.available.load(Ordering::SeqCst) {
                return Err(Error::CacheUnavailable("connection refused".to_string()));
            }
            self.inner.insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn remote_hit_promotes_to_local() {
        let store = Arc::new(FlakyStore {
            available: std::sync::atomic::AtomicBool::new(true),
            inner: DashMap::new(),
        });
        let writer =
            ResponseCache::new(Duration::from_secs(60), 10).with_remote(store.clone());
        writer.set("k1", &response("shared")).await;

        // A second cache instance with an empty local tier sees the remote
        // value and promotes it.
        let reader = ResponseCache::new(Duration::from_secs(60), 10).with_remote(store);
        assert_eq!(reader.get("k1").await.unwrap().content, "shared");
        assert_eq!(reader.local_len(), 1);
    }

    #[tokio::test]
    async fn remote_outage_degrades_to_local_only() {
        let store = Arc::new(FlakyStore {
            available: std::sync::atomic::AtomicBool::new(false),
            inner: DashMap::new(),
        });
        let cache = ResponseCache::new(Duration::from_secs(60), 10).with_remote(store);

        // Writes and reads still work through the local tier.
        cache.set("k1", &response("local")).await;
        assert_eq!(cache.get("k1").await.unwrap().content, "local");
        assert!(cache.get("missing").await.is_none());
    }
}
