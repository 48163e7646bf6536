//! TTL response cache shared by every concurrent `generate` call.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::providers::{GenerationOptions, GenerationResult};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: GenerationResult,
    provider_id: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Expired entries are dropped lazily on lookup, or in bulk by
/// [`ResponseCache::purge_expired`].
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Deterministic key for one request.
    ///
    /// `namespace` prefixes the digest (the tenant id) so a whole tenant can be
    /// dropped with [`invalidate`](Self::invalidate). An explicit provider
    /// override is part of the key, since it changes who answers.
    pub fn key_for(
        namespace: &str,
        prompt: &str,
        options: &GenerationOptions,
        route_override: Option<&str>,
    ) -> String {
        let mut hasher = Sha256::new();
        let h = &mut hasher;
        hash_field(h, "prompt", prompt);
        hash_field(h, "system", options.system_prompt.as_deref().unwrap_or(""));
        hash_field(h, "model", options.model.as_deref().unwrap_or(""));
        hash_field(
            h,
            "max_tokens",
            &options.max_tokens.map(|v| v.to_string()).unwrap_or_default(),
        );
        hash_field(
            h,
            "temperature",
            &options
                .temperature
                .map(|v| v.to_bits().to_string())
                .unwrap_or_default(),
        );
        for stop in &options.stop {
            hash_field(h, "stop", stop);
        }
        for (key, value) in &options.extra {
            hash_field(h, key, &value.to_string());
        }
        hash_field(h, "route", route_override.unwrap_or(""));

        format!("{namespace}:{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<GenerationResult> {
        let now = Instant::now();
        let hit = {
            let entry = self.entries.get(key)?;
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        };

        if hit.is_none() {
            // Re-check under the shard lock so a fresh overwrite is not lost.
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
            debug!(key = %key, "Cache entry expired");
        }
        hit
    }

    pub fn set(&self, key: String, value: GenerationResult, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry {
            provider_id: value.provider_id.clone(),
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key, entry);
    }

    /// Remove every key starting with `prefix`; returns how many were removed.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before.saturating_sub(self.entries.len());
        debug!(prefix = %prefix, removed, "Invalidated cache entries");
        removed
    }

    /// Remove every entry produced by `provider_id`.
    pub fn invalidate_provider(&self, provider_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.provider_id != provider_id);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(provider_id = %provider_id, removed, "Invalidated provider cache entries");
        }
        removed
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Periodically reclaim expired entries until `shutdown` fires.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = self.purge_expired();
                        if purged > 0 {
                            debug!(purged, remaining = self.len(), "Swept expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

fn hash_field(hasher: &mut Sha256, name: &str, value: &str) {
    hasher.update(name.as_bytes());
    hasher.update([0x1f]);
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str, provider_id: &str) -> GenerationResult {
        let mut result = GenerationResult::new(text, "test-model");
        result.provider_id = provider_id.to_string();
        result
    }

    #[test]
    fn test_key_is_deterministic_and_sensitive() {
        let options = GenerationOptions::new().with_parameters(Some(16), Some(0.3));
        let a = ResponseCache::key_for("default", "hello", &options, None);
        let b = ResponseCache::key_for("default", "hello", &options.clone(), None);
        assert_eq!(a, b);
        assert!(a.starts_with("default:"));

        let other_prompt = ResponseCache::key_for("default", "hello!", &options, None);
        let other_options = ResponseCache::key_for("default", "hello", &GenerationOptions::new(), None);
        let routed = ResponseCache::key_for("default", "hello", &options, Some("p2"));
        assert_ne!(a, other_prompt);
        assert_ne!(a, other_options);
        assert_ne!(a, routed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_lazily() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set("t:a".to_string(), result("ok", "p1"), None);
        assert_eq!(cache.get("t:a").map(|r| r.text), Some("ok".to_string()));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("t:a").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_keeps_fresh_entries() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set("t:short".to_string(), result("a", "p1"), Some(Duration::from_secs(5)));
        cache.set("t:long".to_string(), result("b", "p1"), None);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidation() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set("acme:1".to_string(), result("a", "p1"), None);
        cache.set("acme:2".to_string(), result("b", "p2"), None);
        cache.set("other:3".to_string(), result("c", "p1"), None);

        assert_eq!(cache.invalidate_provider("p1"), 2);
        assert_eq!(cache.invalidate("acme:"), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_and_stops() {
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(10)));
        cache.set("t:a".to_string(), result("a", "p1"), None);

        let shutdown = CancellationToken::new();
        let handle = cache.clone().spawn_sweeper(Duration::from_secs(30), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(cache.is_empty());

        shutdown.cancel();
        handle.await.expect("sweeper stopped");
    }

    #[test]
    fn test_set_overwrites() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set("k".to_string(), result("first", "p1"), None);
        cache.set("k".to_string(), result("second", "p1"), None);
        assert_eq!(cache.get("k").map(|r| r.text), Some("second".to_string()));
    }
}
