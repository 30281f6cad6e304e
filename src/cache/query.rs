//! Tagged query cache
//!
//! Each query is registered under a key with the tags it provides and a
//! fetcher. `get` serves cached data while it is fresh and refetches once it
//! has been invalidated; concurrent callers of a stale query share a single
//! fetch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::{CacheTag, InvalidationSink};
use crate::error::{Result, SyncError};

/// Produces the current value of a query
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

const INVALIDATION_CHANNEL_CAPACITY: usize = 64;

struct Entry {
    tags: Vec<CacheTag>,
    fetcher: Fetcher,
    data: RwLock<Option<Value>>,
    stale: AtomicBool,
    fetches: AtomicU64,
    /// Serializes refetches of this entry
    fetch_lock: tokio::sync::Mutex<()>,
}

impl Entry {
    fn fresh(&self) -> Option<Value> {
        if self.stale.load(Ordering::SeqCst) {
            return None;
        }
        self.data.read().clone()
    }

    fn provides_any(&self, tags: &[CacheTag]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

/// In-memory query cache keyed by query name
pub struct QueryCache {
    entries: RwLock<HashMap<String, Arc<Entry>>>,
    invalidations: Mutex<HashMap<CacheTag, u64>>,
    events: broadcast::Sender<Vec<CacheTag>>,
}

impl QueryCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            invalidations: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Register (or replace) a query. It starts empty and is fetched on
    /// first `get`.
    pub fn register<F>(&self, key: impl Into<String>, tags: &[CacheTag], fetcher: F)
    where
        F: Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        let key = key.into();
        let entry = Arc::new(Entry {
            tags: tags.to_vec(),
            fetcher: Arc::new(fetcher),
            data: RwLock::new(None),
            stale: AtomicBool::new(false),
            fetches: AtomicU64::new(0),
            fetch_lock: tokio::sync::Mutex::new(()),
        });
        tracing::debug!(query = %key, ?tags, "query registered");
        self.entries.write().insert(key, entry);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Cached value if fresh, otherwise fetch it
    pub async fn get(&self, key: &str) -> Result<Value> {
        let entry = self.entry(key)?;
        if let Some(value) = entry.fresh() {
            return Ok(value);
        }

        let _guard = entry.fetch_lock.lock().await;
        // Another caller may have refetched while we waited
        if let Some(value) = entry.fresh() {
            return Ok(value);
        }

        // Clear before fetching so an invalidation that lands mid-fetch
        // leaves the entry stale
        let was_stale = entry.stale.swap(false, Ordering::SeqCst);
        entry.fetches.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(query = key, was_stale, "fetching query");

        match (entry.fetcher)().await {
            Ok(value) => {
                *entry.data.write() = Some(value.clone());
                Ok(value)
            }
            Err(e) => {
                if was_stale {
                    entry.stale.store(true, Ordering::SeqCst);
                }
                tracing::warn!(query = key, error = %e, "query fetch failed");
                Err(e)
            }
        }
    }

    /// Cached value regardless of staleness, without fetching
    pub fn peek(&self, key: &str) -> Option<Value> {
        let entry = self.entries.read().get(key).cloned()?;
        let value = entry.data.read().clone();
        value
    }

    pub fn is_stale(&self, key: &str) -> bool {
        self.entries
            .read()
            .get(key)
            .is_some_and(|e| e.stale.load(Ordering::SeqCst))
    }

    /// Mark every query providing any of `tags` stale. Returns how many
    /// queries were affected.
    pub fn invalidate_tags(&self, tags: &[CacheTag]) -> usize {
        if tags.is_empty() {
            return 0;
        }
        {
            let mut counts = self.invalidations.lock();
            for tag in tags {
                *counts.entry(*tag).or_insert(0) += 1;
            }
        }

        let affected = self
            .entries
            .read()
            .values()
            .filter(|e| e.provides_any(tags))
            .map(|e| e.stale.store(true, Ordering::SeqCst))
            .count();

        tracing::debug!(?tags, affected, "cache tags invalidated");
        let _ = self.events.send(tags.to_vec());
        affected
    }

    /// Times `tag` has been invalidated
    pub fn invalidations(&self, tag: CacheTag) -> u64 {
        self.invalidations.lock().get(&tag).copied().unwrap_or(0)
    }

    /// Fetches performed for `key` (0 for unknown keys)
    pub fn fetch_count(&self, key: &str) -> u64 {
        self.entries
            .read()
            .get(key)
            .map_or(0, |e| e.fetches.load(Ordering::SeqCst))
    }

    /// Stream of invalidated tag sets, for consumers that refetch eagerly
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<CacheTag>> {
        self.events.subscribe()
    }

    /// Refetch every stale query that has been loaded at least once.
    /// Returns how many refetches succeeded; failures are logged.
    pub async fn refresh_stale(&self) -> usize {
        let stale: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.stale.load(Ordering::SeqCst) && e.data.read().is_some())
            .map(|(k, _)| k.clone())
            .collect();

        let mut refreshed = 0;
        for key in stale {
            if self.get(&key).await.is_ok() {
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Refetch stale queries whenever tags are invalidated, until the cache
    /// is dropped
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let Some(cache) = cache.upgrade() else { break };
                        let refreshed = cache.refresh_stale().await;
                        tracing::debug!(refreshed, "stale queries refreshed");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn entry(&self, key: &str) -> Result<Arc<Entry>> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| SyncError::UnknownQuery(key.to_string()))
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationSink for QueryCache {
    fn invalidate_tags(&self, tags: &[CacheTag]) {
        QueryCache::invalidate_tags(self, tags);
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("queries", &self.keys())
            .field("invalidations", &*self.invalidations.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use std::time::Duration;

    fn counting_fetcher(
        counter: Arc<AtomicU64>,
    ) -> impl Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static {
        move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({ "version": n }))
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_get_caches_until_invalidated() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicU64::new(0));
        cache.register("contents", &[CacheTag::Content], counting_fetcher(calls.clone()));

        assert_eq!(cache.get("contents").await.unwrap(), json!({"version": 1}));
        assert_eq!(cache.get("contents").await.unwrap(), json!({"version": 1}));
        assert_eq!(cache.fetch_count("contents"), 1);

        assert_eq!(cache.invalidate_tags(&[CacheTag::Content]), 1);
        assert!(cache.is_stale("contents"));
        assert_eq!(cache.peek("contents"), Some(json!({"version": 1})));

        assert_eq!(cache.get("contents").await.unwrap(), json!({"version": 2}));
        assert!(!cache.is_stale("contents"));
        assert_eq!(cache.fetch_count("contents"), 2);
    }

    #[tokio::test]
    async fn test_invalidation_is_per_tag() {
        let cache = QueryCache::new();
        cache.register("contents", &[CacheTag::Content], counting_fetcher(Arc::default()));
        cache.register("businesses", &[CacheTag::Businesses], counting_fetcher(Arc::default()));
        cache.get("contents").await.unwrap();
        cache.get("businesses").await.unwrap();

        cache.invalidate_tags(&[CacheTag::Businesses]);
        assert!(!cache.is_stale("contents"));
        assert!(cache.is_stale("businesses"));
        assert_eq!(cache.invalidations(CacheTag::Businesses), 1);
        assert_eq!(cache.invalidations(CacheTag::Content), 0);
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_fetch() {
        let cache = Arc::new(QueryCache::new());
        let calls = Arc::new(AtomicU64::new(0));
        let calls_clone = calls.clone();
        cache.register("slow", &[CacheTag::Content], move || {
            let calls = calls_clone.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!("done"))
            }
            .boxed()
        });

        let (a, b) = tokio::join!(cache.get("slow"), cache.get("slow"));
        assert_eq!(a.unwrap(), json!("done"));
        assert_eq!(b.unwrap(), json!("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_query() {
        let cache = QueryCache::new();
        assert!(matches!(
            cache.get("missing").await,
            Err(SyncError::UnknownQuery(_))
        ));
        assert_eq!(cache.fetch_count("missing"), 0);
    }

    #[tokio::test]
    async fn test_failed_refetch_stays_stale() {
        let cache = QueryCache::new();
        let fail = Arc::new(AtomicBool::new(false));
        let fail_clone = fail.clone();
        cache.register("flaky", &[CacheTag::Users], move || {
            let fail = fail_clone.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(SyncError::Api {
                        status: 503,
                        message: "unavailable".into(),
                    })
                } else {
                    Ok(json!([]))
                }
            }
            .boxed()
        });

        cache.get("flaky").await.unwrap();
        cache.invalidate_tags(&[CacheTag::Users]);
        fail.store(true, Ordering::SeqCst);
        assert!(cache.get("flaky").await.is_err());
        assert!(cache.is_stale("flaky"));
        // Last good data is kept
        assert_eq!(cache.peek("flaky"), Some(json!([])));
    }

    #[tokio::test]
    async fn test_refresh_stale_and_subscribe() {
        let cache = QueryCache::new();
        let mut rx = cache.subscribe();
        cache.register("contents", &[CacheTag::Content], counting_fetcher(Arc::default()));
        cache.register("never-loaded", &[CacheTag::Content], counting_fetcher(Arc::default()));
        cache.get("contents").await.unwrap();

        cache.invalidate_tags(&[CacheTag::Content]);
        assert_eq!(rx.recv().await.unwrap(), vec![CacheTag::Content]);

        assert_eq!(cache.refresh_stale().await, 1);
        assert_eq!(cache.fetch_count("contents"), 2);
        assert_eq!(cache.fetch_count("never-loaded"), 0);
    }

    #[tokio::test]
    async fn test_auto_refresh() {
        let cache = Arc::new(QueryCache::new());
        cache.register("contents", &[CacheTag::Content], counting_fetcher(Arc::default()));
        cache.get("contents").await.unwrap();
        let handle = cache.spawn_auto_refresh();

        cache.invalidate_tags(&[CacheTag::Content]);
        for _ in 0..50 {
            if cache.fetch_count("contents") == 2 && !cache.is_stale("contents") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.fetch_count("contents"), 2);
        assert_eq!(cache.peek("contents"), Some(json!({"version": 2})));
        handle.abort();
    }
}
