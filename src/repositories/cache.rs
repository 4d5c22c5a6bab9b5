use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::session::{SessionId, SessionRecord};
use crate::repositories::session::{require_id, SessionStore};

/// The cache name used for active sessions unless configured otherwise.
pub const ACTIVE_SESSION_CACHE_NAME: &str = "gatekeeper-activeSessionCache";

/// A cache of session records keyed by id.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn get(&self, id: &SessionId) -> Option<SessionRecord>;

    async fn put(&self, id: SessionId, record: SessionRecord);

    async fn remove(&self, id: &SessionId) -> Option<SessionRecord>;

    async fn values(&self) -> Vec<SessionRecord>;

    async fn len(&self) -> usize;

    async fn clear(&self);
}

/// A `SessionCache` backed by an in-process map.
#[derive(Clone)]
pub struct MemorySessionCache {
    name: String,
    entries: Arc<RwLock<HashMap<SessionId, SessionRecord>>>,
}

impl MemorySessionCache {
    /// Creates a new, empty cache called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn get(&self, id: &SessionId) -> Option<SessionRecord> {
        let entries = self.entries.read().await;
        entries.get(id).cloned()
    }

    async fn put(&self, id: SessionId, record: SessionRecord) {
        let mut entries = self.entries.write().await;
        entries.insert(id, record);
    }

    async fn remove(&self, id: &SessionId) -> Option<SessionRecord> {
        let mut entries = self.entries.write().await;
        entries.remove(id)
    }

    async fn values(&self) -> Vec<SessionRecord> {
        let entries = self.entries.read().await;
        entries.values().cloned().collect()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }
}

/// Hands out named caches.
pub trait CacheManager: Send + Sync {
    /// Returns the cache called `name`, creating it on first use.
    fn get_cache(&self, name: &str) -> Arc<dyn SessionCache>;
}

/// A `CacheManager` holding `MemorySessionCache`s.
#[derive(Default)]
pub struct MemoryCacheManager {
    caches: Mutex<HashMap<String, Arc<MemorySessionCache>>>,
}

impl MemoryCacheManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheManager for MemoryCacheManager {
    fn get_cache(&self, name: &str) -> Arc<dyn SessionCache> {
        let mut caches = self.caches.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        caches
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating session cache [{}]", name);
                Arc::new(MemorySessionCache::new(name))
            })
            .clone()
    }
}

/// Components that accept a `CacheManager` at wiring time.
pub trait CacheManagerAware: Send + Sync {
    fn set_cache_manager(&self, cache_manager: Arc<dyn CacheManager>);
}

/// A `SessionStore` that keeps active sessions in a cache in front of a backing store.
///
/// Valid sessions are cached on create and update; invalid ones are evicted.
/// Without a cache every call goes straight to the backing store.
pub struct CachingSessionStore {
    backing: Arc<dyn SessionStore>,
    cache_name: String,
    cache: OnceLock<Arc<dyn SessionCache>>,
}

impl CachingSessionStore {
    /// Wraps `backing`. The cache is supplied later by a `CacheManager`.
    pub fn new(backing: Arc<dyn SessionStore>) -> Self {
        Self::with_cache_name(backing, ACTIVE_SESSION_CACHE_NAME)
    }

    pub fn with_cache_name(backing: Arc<dyn SessionStore>, cache_name: impl Into<String>) -> Self {
        Self {
            backing,
            cache_name: cache_name.into(),
            cache: OnceLock::new(),
        }
    }

    /// Wraps `backing` with an explicit cache.
    pub fn with_cache(backing: Arc<dyn SessionStore>, cache: Arc<dyn SessionCache>) -> Self {
        let store = Self::new(backing);
        let _ = store.cache.set(cache);
        store
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn active_sessions_cache(&self) -> Option<&Arc<dyn SessionCache>> {
        self.cache.get()
    }

    async fn cache_record(&self, id: SessionId, record: &SessionRecord) {
        if let Some(cache) = self.cache.get() {
            cache.put(id, record.clone()).await;
        }
    }

    async fn uncache(&self, id: &SessionId) {
        if let Some(cache) = self.cache.get() {
            cache.remove(id).await;
        }
    }
}

impl CacheManagerAware for CachingSessionStore {
    fn set_cache_manager(&self, cache_manager: Arc<dyn CacheManager>) {
        let cache = cache_manager.get_cache(&self.cache_name);
        if self.cache.set(cache).is_err() {
            tracing::debug!(
                "Session cache [{}] already wired, ignoring cache manager",
                self.cache_name
            );
        }
    }
}

#[async_trait]
impl SessionStore for CachingSessionStore {
    async fn create(&self, record: &mut SessionRecord) -> Result<SessionId> {
        let id = self.backing.create(record).await?;
        self.cache_record(id, record).await;
        Ok(id)
    }

    async fn read_session(&self, id: SessionId) -> Result<Option<SessionRecord>> {
        if let Some(cache) = self.cache.get() {
            if let Some(cached) = cache.get(&id).await {
                tracing::trace!("Session {} retrieved from cache", id);
                return Ok(Some(cached));
            }
        }
        self.backing.read_session(id).await
    }

    async fn update(&self, record: &SessionRecord) -> Result<()> {
        let id = require_id(record)?;
        self.backing.update(record).await?;
        if record.is_valid() {
            self.cache_record(id, record).await;
        } else {
            self.uncache(&id).await;
        }
        Ok(())
    }

    async fn delete(&self, record: &SessionRecord) -> Result<()> {
        let id = require_id(record)?;
        self.uncache(&id).await;
        self.backing.delete(record).await
    }

    async fn active_sessions(&self) -> Result<Vec<SessionRecord>> {
        match self.cache.get() {
            Some(cache) => Ok(cache.values().await),
            None => self.backing.active_sessions().await,
        }
    }

    fn cache_manager_aware(&self) -> Option<&dyn CacheManagerAware> {
        Some(self)
    }
}
