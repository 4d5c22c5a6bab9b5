use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, SecurityError};
use crate::models::session::{SessionId, SessionRecord};
use crate::repositories::cache::CacheManagerAware;

/// Produces ids for new sessions.
pub trait SessionIdGenerator: Send + Sync {
    fn generate_id(&self) -> SessionId;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidSessionIdGenerator;

impl SessionIdGenerator for UuidSessionIdGenerator {
    fn generate_id(&self) -> SessionId {
        SessionId::new_v4()
    }
}

/// CRUD persistence for session records.
///
/// `update` is a full replacement of the stored record, never a delta.
/// Concurrent updates to the same record are resolved by the implementation
/// (last writer wins for the stores in this crate).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new record, assigning and returning its id.
    async fn create(&self, record: &mut SessionRecord) -> Result<SessionId>;

    /// Reads a record, or `None` if there is none with `id`.
    async fn read_session(&self, id: SessionId) -> Result<Option<SessionRecord>>;

    /// Replaces the stored state of `record`.
    async fn update(&self, record: &SessionRecord) -> Result<()>;

    /// Removes `record`.
    async fn delete(&self, record: &SessionRecord) -> Result<()>;

    /// Best-effort enumeration of sessions that are still active.
    ///
    /// Only the validation sweep relies on this; a stale set is acceptable.
    async fn active_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Stores that take a `CacheManager` expose that capability here.
    fn cache_manager_aware(&self) -> Option<&dyn CacheManagerAware> {
        None
    }
}

pub(crate) fn require_id(record: &SessionRecord) -> Result<SessionId> {
    record.id().ok_or(SecurityError::MissingSessionId)
}

/// An in-process session store.
#[derive(Clone)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, SessionRecord>>>,
    id_generator: Arc<dyn SessionIdGenerator>,
}

impl MemorySessionStore {
    /// Creates a new, empty `MemorySessionStore`.
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(UuidSessionIdGenerator))
    }

    pub fn with_id_generator(id_generator: Arc<dyn SessionIdGenerator>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            id_generator,
        }
    }

    /// The number of stored records, active or not.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, record: &mut SessionRecord) -> Result<SessionId> {
        let mut sessions = self.sessions.write().await;

        let mut id = self.id_generator.generate_id();
        while sessions.contains_key(&id) {
            tracing::warn!("Session id collision on {}, regenerating", id);
            id = self.id_generator.generate_id();
        }

        record.set_id(id);
        sessions.insert(id, record.clone());
        tracing::trace!("Created session {}", id);
        Ok(id)
    }

    async fn read_session(&self, id: SessionId) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).cloned())
    }

    async fn update(&self, record: &SessionRecord) -> Result<()> {
        let id = require_id(record)?;
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, record.clone());
        Ok(())
    }

    async fn delete(&self, record: &SessionRecord) -> Result<()> {
        let id = require_id(record)?;
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id);
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<SessionRecord>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().filter(|r| r.is_valid()).cloned().collect())
    }
}
