//! Ephemeral key-value store: job status/progress/activity, distributed locks,
//! and the robots/sitemap HTTP caches. Namespaced the way the original Redis
//! layer was (`cira:<parts>`), but modeled as a trait so the default in-memory
//! backend can stand in for a real Redis deployment in tests and single-node
//! runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub const NAMESPACE: &str = "cira";
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(3600);
pub const PROGRESS_EXPIRY: Duration = Duration::from_secs(86400);
pub const LOCK_EXPIRY: Duration = Duration::from_secs(60);

/// Build a namespaced key, e.g. `cira:job:<id>:status`.
pub fn make_key(parts: &[&str]) -> String {
    let mut key = String::from(NAMESPACE);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-process cache/lock store behind a simple trait so a real Redis client
/// can be substituted without touching callers.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>);
    async fn delete(&self, key: &str);
    /// SET NX EX semantics: succeeds only if the key is absent or expired.
    async fn acquire_lock(&self, key: &str, holder: &str, ttl: Duration) -> bool;
    /// Atomic check-and-delete: releases only if `holder` still owns the lock.
    async fn release_lock(&self, key: &str, holder: &str) -> bool;
    /// Atomic check-and-extend: extends only if `holder` still owns the lock.
    async fn extend_lock(&self, key: &str, holder: &str, ttl: Duration) -> bool;
    async fn lock_holder(&self, key: &str) -> Option<String>;
    /// Remove every key whose namespaced parts start with `prefix_parts`.
    async fn cleanup_prefix(&self, prefix_parts: &[&str]);
}

/// Default, in-memory implementation. Good enough for single-process
/// deployments and for tests; a Redis-backed implementation can satisfy the
/// same trait for multi-node deployments.
#[derive(Default, Clone)]
pub struct InMemoryCacheStore {
    data: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        InMemoryCacheStore {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn is_live(entry: &Entry) -> bool {
        match entry.expires_at {
            Some(t) => Instant::now() < t,
            None => true,
        }
    }
}

#[async_trait::async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Option<String> {
        let data = self.data.read().await;
        data.get(key)
            .filter(|e| Self::is_live(e))
            .map(|e| e.value.clone())
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        let mut data = self.data.write().await;
        data.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
    }

    async fn delete(&self, key: &str) {
        let mut data = self.data.write().await;
        data.remove(key);
    }

    async fn acquire_lock(&self, key: &str, holder: &str, ttl: Duration) -> bool {
        let mut data = self.data.write().await;
        if let Some(existing) = data.get(key) {
            if Self::is_live(existing) {
                return false;
            }
        }
        data.insert(
            key.to_string(),
            Entry {
                value: holder.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        true
    }

    async fn release_lock(&self, key: &str, holder: &str) -> bool {
        let mut data = self.data.write().await;
        match data.get(key) {
            Some(e) if Self::is_live(e) && e.value == holder => {
                data.remove(key);
                true
            }
            _ => false,
        }
    }

    async fn extend_lock(&self, key: &str, holder: &str, ttl: Duration) -> bool {
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            Some(e) if Self::is_live(e) && e.value == holder => {
                e.expires_at = Some(Instant::now() + ttl);
                true
            }
            _ => false,
        }
    }

    async fn lock_holder(&self, key: &str) -> Option<String> {
        let data = self.data.read().await;
        data.get(key)
            .filter(|e| Self::is_live(e))
            .map(|e| e.value.clone())
    }

    async fn cleanup_prefix(&self, prefix_parts: &[&str]) {
        let prefix = make_key(prefix_parts);
        let mut data = self.data.write().await;
        data.retain(|k, _| !k.starts_with(&prefix));
    }
}

/// Thin JSON-aware helper layered over a `CacheStore`, matching the original
/// RedisService's cache_get/cache_set convenience methods.
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Cache { store }
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key).await?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Ok(raw) = serde_json::to_string(value) {
            self.store.set(key, raw, Some(ttl)).await;
        }
    }

    pub async fn delete(&self, key: &str) {
        self.store.delete(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_key() {
        assert_eq!(make_key(&["job", "abc", "status"]), "cira:job:abc:status");
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = InMemoryCacheStore::new();
        store.set("k", "v".into(), None).await;
        assert_eq!(store.get("k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let store = InMemoryCacheStore::new();
        assert!(store.acquire_lock("lock", "worker-1", LOCK_EXPIRY).await);
        // Different holder can't acquire while held.
        assert!(!store.acquire_lock("lock", "worker-2", LOCK_EXPIRY).await);
        // Wrong holder can't release.
        assert!(!store.release_lock("lock", "worker-2").await);
        assert!(store.release_lock("lock", "worker-1").await);
        // Now it's free again.
        assert!(store.acquire_lock("lock", "worker-2", LOCK_EXPIRY).await);
    }

    #[tokio::test]
    async fn test_lock_extend() {
        let store = InMemoryCacheStore::new();
        store
            .acquire_lock("lock", "worker-1", Duration::from_millis(10))
            .await;
        assert!(store.extend_lock("lock", "worker-1", LOCK_EXPIRY).await);
        assert!(!store.extend_lock("lock", "worker-2", LOCK_EXPIRY).await);
    }

    #[tokio::test]
    async fn test_cleanup_prefix() {
        let store = InMemoryCacheStore::new();
        store
            .set(&make_key(&["job", "1", "status"]), "x".into(), None)
            .await;
        store
            .set(&make_key(&["job", "1", "progress"]), "y".into(), None)
            .await;
        store.set(&make_key(&["job", "2", "status"]), "z".into(), None).await;
        store.cleanup_prefix(&["job", "1"]).await;
        assert!(store.get(&make_key(&["job", "1", "status"])).await.is_none());
        assert!(store.get(&make_key(&["job", "2", "status"])).await.is_some());
    }
}
