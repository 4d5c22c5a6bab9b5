use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::{SecurityConfig, UpdateMode, DEFAULT_SESSION_VALIDATION_INTERVAL};
use crate::error::{Result, SecurityError};
use crate::models::session::{
    AttributeValue, SessionContext, SessionId, SessionKey, SessionRecord, SessionView,
    DEFAULT_GLOBAL_SESSION_TIMEOUT,
};
use crate::repositories::cache::CacheManager;
use crate::repositories::session::{MemorySessionStore, SessionStore};
use crate::services::listener::SessionListener;
use crate::services::session_factory::{SessionFactory, SimpleSessionFactory};
use crate::services::validation::{ValidatingSessionManager, ValidationScheduler};

/// Creates, validates and mutates sessions on behalf of callers holding a `SessionKey`.
///
/// Every read validates the record. Invalid records are stopped or expired,
/// persisted or deleted, and announced to listeners before the typed error
/// reaches the caller.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    factory: Arc<dyn SessionFactory>,
    clock: Arc<dyn Clock>,
    listeners: Vec<Arc<dyn SessionListener>>,
    global_session_timeout: i64,
    delete_invalid_sessions: bool,
    update_mode: UpdateMode,
    scheduler_enabled: bool,
    /// Dirty records awaiting `flush` in deferred mode. Never held across an await.
    pending: Mutex<HashMap<SessionId, SessionRecord>>,
    scheduler: ValidationScheduler,
}

impl SessionManager {
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::default()
    }

    /// Creates a manager over `store` with default settings.
    pub fn new(store: Arc<dyn SessionStore>) -> Arc<Self> {
        Self::builder().store(store).build()
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn global_session_timeout(&self) -> i64 {
        self.global_session_timeout
    }

    pub fn delete_invalid_sessions(&self) -> bool {
        self.delete_invalid_sessions
    }

    pub fn update_mode(&self) -> UpdateMode {
        self.update_mode
    }

    pub fn scheduler(&self) -> &ValidationScheduler {
        &self.scheduler
    }

    /// Whether the background sweep starts on first use.
    pub fn is_session_validation_scheduler_enabled(&self) -> bool {
        self.scheduler_enabled
    }

    /// Stops the background sweep. Sessions are left untouched.
    pub fn shutdown(&self) {
        self.scheduler.disable();
    }

    /// Starts a new session.
    ///
    /// # Arguments
    ///
    /// * `context` - The originating host and initial attributes.
    ///
    /// # Returns
    ///
    /// A `Result` containing a handle bound to the new session's id.
    pub async fn start(self: &Arc<Self>, context: &SessionContext) -> Result<Session> {
        let now = self.clock.now();
        let mut record = self.factory.create_session(context, now);
        record.set_timeout(self.global_session_timeout);

        self.enable_validation_if_necessary();

        let id = self.store.create(&mut record).await?;
        tracing::debug!(
            "Started session {} (host: {})",
            id,
            record.host().unwrap_or("unknown")
        );

        self.notify(&record, "start", |listener, view| listener.on_start(view));
        Ok(Session::new(Arc::clone(self), SessionKey::new(id)))
    }

    /// Looks up and validates the session for `key`.
    ///
    /// Returns `Ok(None)` when no session exists. An existing but invalid
    /// session yields `StoppedSession` or `ExpiredSession` after cleanup.
    pub async fn get_session(self: &Arc<Self>, key: &SessionKey) -> Result<Option<Session>> {
        Ok(self
            .lookup(key)
            .await?
            .map(|_| Session::new(Arc::clone(self), *key)))
    }

    pub async fn touch(&self, key: &SessionKey) -> Result<()> {
        let mut record = self.lookup_required(key).await?;
        record.touch(self.clock.now());
        self.on_change(&record).await
    }

    pub async fn get_start_timestamp(&self, key: &SessionKey) -> Result<DateTime<Utc>> {
        Ok(self.lookup_required(key).await?.start_timestamp())
    }

    pub async fn get_last_access_time(&self, key: &SessionKey) -> Result<DateTime<Utc>> {
        Ok(self.lookup_required(key).await?.last_access_time())
    }

    /// The idle timeout in milliseconds.
    pub async fn get_timeout(&self, key: &SessionKey) -> Result<i64> {
        Ok(self.lookup_required(key).await?.timeout())
    }

    pub async fn set_timeout(&self, key: &SessionKey, timeout: i64) -> Result<()> {
        let mut record = self.lookup_required(key).await?;
        record.set_timeout(timeout);
        self.on_change(&record).await
    }

    pub async fn get_host(&self, key: &SessionKey) -> Result<Option<String>> {
        Ok(self.lookup_required(key).await?.host().map(str::to_owned))
    }

    pub async fn get_attribute_keys(&self, key: &SessionKey) -> Result<Vec<String>> {
        Ok(self.lookup_required(key).await?.attribute_keys())
    }

    pub async fn get_attribute(&self, key: &SessionKey, name: &str) -> Result<Option<AttributeValue>> {
        Ok(self.lookup_required(key).await?.attribute(name).cloned())
    }

    /// Stores `value` under `name`. `None` removes the attribute.
    pub async fn set_attribute(
        &self,
        key: &SessionKey,
        name: &str,
        value: Option<AttributeValue>,
    ) -> Result<()> {
        let Some(value) = value else {
            self.remove_attribute(key, name).await?;
            return Ok(());
        };

        let mut record = self.lookup_required(key).await?;
        record.set_attribute(name, Some(value));
        self.on_change(&record).await
    }

    /// Removes `name`, persisting only if something was removed.
    pub async fn remove_attribute(&self, key: &SessionKey, name: &str) -> Result<Option<AttributeValue>> {
        let mut record = self.lookup_required(key).await?;
        let removed = record.remove_attribute(name);
        if removed.is_some() {
            self.on_change(&record).await?;
        }
        Ok(removed)
    }

    /// Returns `false` for missing, stopped or expired sessions.
    pub async fn is_valid(&self, key: &SessionKey) -> Result<bool> {
        match self.check_valid(key).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_invalid_session() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fails with an invalid-session error unless `key` names a valid session.
    pub async fn check_valid(&self, key: &SessionKey) -> Result<()> {
        self.lookup_required(key).await.map(|_| ())
    }

    /// Explicitly stops the session for `key`.
    pub async fn stop(&self, key: &SessionKey) -> Result<()> {
        let mut record = self.lookup_required(key).await?;
        let id = key.session_id();

        tracing::debug!("Stopping session with id [{}]", id);
        record.stop(self.clock.now());
        record.mark_stop_access();
        self.take_pending(&id);

        self.notify(&record, "stop", |listener, view| listener.on_stop(view));
        self.persist_invalidated(&record).await
    }

    /// Writes all buffered updates to the store.
    ///
    /// Records that could not be written stay buffered for the next flush.
    pub async fn flush(&self) -> Result<()> {
        let dirty: Vec<SessionRecord> = {
            let mut pending = self.lock_pending();
            pending.drain().map(|(_, record)| record).collect()
        };
        if dirty.is_empty() {
            return Ok(());
        }

        tracing::trace!("Flushing {} deferred session updates", dirty.len());
        let mut remaining = dirty.into_iter();
        while let Some(record) = remaining.next() {
            if let Err(e) = self.store.update(&record).await {
                tracing::warn!("⚠️ Deferred session flush failed: {}", e);
                let mut pending = self.lock_pending();
                for unwritten in std::iter::once(record).chain(remaining) {
                    if let Some(id) = unwritten.id() {
                        pending.entry(id).or_insert(unwritten);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Runs one unit of work, then flushes buffered updates.
    ///
    /// The work's own error takes precedence over a flush error.
    pub async fn scope<F, T>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = work.await;
        let flushed = self.flush().await;
        let value = outcome?;
        flushed?;
        Ok(value)
    }

    /// The number of records waiting for `flush`.
    pub fn pending_updates(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, SessionRecord>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pending_record(&self, id: &SessionId) -> Option<SessionRecord> {
        self.lock_pending().get(id).cloned()
    }

    fn take_pending(&self, id: &SessionId) -> Option<SessionRecord> {
        self.lock_pending().remove(id)
    }

    fn enable_validation_if_necessary(&self) {
        if self.scheduler_enabled {
            self.scheduler.enable_if_idle();
        }
    }

    async fn retrieve(&self, id: SessionId) -> Result<Option<SessionRecord>> {
        if let Some(buffered) = self.pending_record(&id) {
            return Ok(Some(buffered));
        }
        self.store.read_session(id).await
    }

    async fn lookup(&self, key: &SessionKey) -> Result<Option<SessionRecord>> {
        self.enable_validation_if_necessary();

        let Some(mut record) = self.retrieve(key.session_id()).await? else {
            tracing::debug!("Unable to resolve session with id [{}]", key.session_id());
            return Ok(None);
        };
        self.validate_record(&mut record).await?;
        Ok(Some(record))
    }

    async fn lookup_required(&self, key: &SessionKey) -> Result<SessionRecord> {
        self.lookup(key)
            .await?
            .ok_or(SecurityError::UnknownSession(key.session_id()))
    }

    async fn on_change(&self, record: &SessionRecord) -> Result<()> {
        match self.update_mode {
            UpdateMode::Immediate => self.store.update(record).await,
            UpdateMode::Deferred => {
                let id = crate::repositories::session::require_id(record)?;
                self.lock_pending().insert(id, record.clone());
                Ok(())
            }
        }
    }

    /// Validates `record`, running the invalidation side effects on failure.
    async fn validate_record(&self, record: &mut SessionRecord) -> Result<()> {
        let outcome = record.validate(self.clock.now());
        match &outcome {
            Err(SecurityError::ExpiredSession(id)) => {
                tracing::debug!("Session {} has expired", id);
                self.take_pending(id);
                if let Err(e) = self.persist_invalidated(record).await {
                    tracing::warn!("⚠️ Failed to persist expired session {}: {}", id, e);
                }
                self.notify(record, "expiration", |listener, view| listener.on_expiration(view));
            }
            Err(SecurityError::StoppedSession(id)) => {
                tracing::debug!("Session {} was stopped", id);
                self.take_pending(id);
                record.mark_stop_access();
                if let Err(e) = self.persist_invalidated(record).await {
                    tracing::warn!("⚠️ Failed to persist stopped session {}: {}", id, e);
                }
                self.notify(record, "stop", |listener, view| listener.on_stop(view));
            }
            _ => {}
        }
        outcome
    }

    /// Deletes or writes through an invalidated record, bypassing the deferred buffer.
    async fn persist_invalidated(&self, record: &SessionRecord) -> Result<()> {
        if self.delete_invalid_sessions {
            self.store.delete(record).await
        } else {
            self.store.update(record).await
        }
    }

    fn notify<F>(&self, record: &SessionRecord, event: &str, callback: F)
    where
        F: Fn(&dyn SessionListener, &SessionView) -> Result<()>,
    {
        if self.listeners.is_empty() {
            return;
        }
        let view = SessionView::from(record);
        for listener in &self.listeners {
            if let Err(e) = callback(listener.as_ref(), &view) {
                tracing::warn!(
                    "⚠️ Session listener failed on {} for session {}: {}",
                    event,
                    record.id().unwrap_or_default(),
                    e
                );
            }
        }
    }
}

#[async_trait]
impl ValidatingSessionManager for SessionManager {
    async fn validate_sessions(&self) -> Result<usize> {
        tracing::info!("Validating all active sessions...");

        let sessions = self.store.active_sessions().await?;
        let mut invalidated = 0usize;

        for stored in sessions {
            let mut record = stored
                .id()
                .and_then(|id| self.pending_record(&id))
                .unwrap_or(stored);

            match self.validate_record(&mut record).await {
                Ok(()) => {}
                Err(e) if e.is_invalid_session() => {
                    tracing::debug!("Invalidated session during sweep: {}", e);
                    invalidated += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Skipping session {} during sweep: {}",
                        record.id().unwrap_or_default(),
                        e
                    );
                }
            }
        }

        if invalidated > 0 {
            tracing::info!("🧹 Finished session validation. {} sessions were stopped.", invalidated);
        } else {
            tracing::info!("Finished session validation. No sessions were stopped.");
        }
        Ok(invalidated)
    }
}

/// Assembles a `SessionManager`.
pub struct SessionManagerBuilder {
    store: Option<Arc<dyn SessionStore>>,
    factory: Arc<dyn SessionFactory>,
    clock: Arc<dyn Clock>,
    listeners: Vec<Arc<dyn SessionListener>>,
    cache_manager: Option<Arc<dyn CacheManager>>,
    global_session_timeout: i64,
    session_validation_interval: Duration,
    scheduler_enabled: bool,
    delete_invalid_sessions: bool,
    update_mode: UpdateMode,
}

impl Default for SessionManagerBuilder {
    fn default() -> Self {
        Self {
            store: None,
            factory: Arc::new(SimpleSessionFactory),
            clock: Arc::new(SystemClock),
            listeners: Vec::new(),
            cache_manager: None,
            global_session_timeout: DEFAULT_GLOBAL_SESSION_TIMEOUT,
            session_validation_interval: DEFAULT_SESSION_VALIDATION_INTERVAL,
            scheduler_enabled: true,
            delete_invalid_sessions: true,
            update_mode: UpdateMode::Immediate,
        }
    }
}

impl SessionManagerBuilder {
    /// Applies the session settings from `config`.
    pub fn config(mut self, config: &SecurityConfig) -> Self {
        self.global_session_timeout = config.global_session_timeout;
        self.session_validation_interval = config.session_validation_interval;
        self.scheduler_enabled = config.session_validation_scheduler_enabled;
        self.delete_invalid_sessions = config.delete_invalid_sessions;
        self.update_mode = config.update_mode;
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// A cache manager pushed into the store if the store accepts one.
    pub fn cache_manager(mut self, cache_manager: Arc<dyn CacheManager>) -> Self {
        self.cache_manager = Some(cache_manager);
        self
    }

    /// Idle timeout for new sessions, in milliseconds.
    pub fn global_session_timeout(mut self, timeout: i64) -> Self {
        self.global_session_timeout = timeout;
        self
    }

    pub fn session_validation_interval(mut self, interval: Duration) -> Self {
        self.session_validation_interval = interval;
        self
    }

    pub fn session_validation_scheduler_enabled(mut self, enabled: bool) -> Self {
        self.scheduler_enabled = enabled;
        self
    }

    pub fn delete_invalid_sessions(mut self, delete: bool) -> Self {
        self.delete_invalid_sessions = delete;
        self
    }

    pub fn update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    pub fn build(self) -> Arc<SessionManager> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));

        if let Some(cache_manager) = self.cache_manager {
            match store.cache_manager_aware() {
                Some(aware) => aware.set_cache_manager(cache_manager),
                None => tracing::debug!("Session store does not accept a cache manager"),
            }
        }

        let interval = self.session_validation_interval;
        Arc::new_cyclic(|weak: &Weak<SessionManager>| {
            let owner: Weak<dyn ValidatingSessionManager> = weak.clone();
            SessionManager {
                store,
                factory: self.factory,
                clock: self.clock,
                listeners: self.listeners,
                global_session_timeout: self.global_session_timeout,
                delete_invalid_sessions: self.delete_invalid_sessions,
                update_mode: self.update_mode,
                scheduler_enabled: self.scheduler_enabled,
                pending: Mutex::new(HashMap::new()),
                scheduler: ValidationScheduler::new(owner, interval),
            }
        })
    }
}

/// A client-facing session handle.
///
/// Holds only the key; every call goes through the manager, so two handles
/// for the same key always observe the same state.
#[derive(Clone)]
pub struct Session {
    key: SessionKey,
    manager: Arc<SessionManager>,
}

impl Session {
    pub fn new(manager: Arc<SessionManager>, key: SessionKey) -> Self {
        Self { key, manager }
    }

    pub fn id(&self) -> SessionId {
        self.key.session_id()
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub async fn start_timestamp(&self) -> Result<DateTime<Utc>> {
        self.manager.get_start_timestamp(&self.key).await
    }

    pub async fn last_access_time(&self) -> Result<DateTime<Utc>> {
        self.manager.get_last_access_time(&self.key).await
    }

    pub async fn timeout(&self) -> Result<i64> {
        self.manager.get_timeout(&self.key).await
    }

    pub async fn set_timeout(&self, timeout: i64) -> Result<()> {
        self.manager.set_timeout(&self.key, timeout).await
    }

    pub async fn host(&self) -> Result<Option<String>> {
        self.manager.get_host(&self.key).await
    }

    pub async fn touch(&self) -> Result<()> {
        self.manager.touch(&self.key).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.manager.stop(&self.key).await
    }

    pub async fn attribute_keys(&self) -> Result<Vec<String>> {
        self.manager.get_attribute_keys(&self.key).await
    }

    pub async fn attribute(&self, name: &str) -> Result<Option<AttributeValue>> {
        self.manager.get_attribute(&self.key, name).await
    }

    pub async fn set_attribute(&self, name: &str, value: Option<AttributeValue>) -> Result<()> {
        self.manager.set_attribute(&self.key, name, value).await
    }

    pub async fn remove_attribute(&self, name: &str) -> Result<Option<AttributeValue>> {
        self.manager.remove_attribute(&self.key, name).await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SessionListener for RecordingListener {
        fn on_start(&self, _session: &SessionView) -> Result<()> {
            self.events.lock().unwrap().push("start".into());
            Ok(())
        }

        fn on_stop(&self, session: &SessionView) -> Result<()> {
            assert_eq!(session.stop_timestamp(), Some(session.last_access_time()));
            self.events.lock().unwrap().push("stop".into());
            Ok(())
        }

        fn on_expiration(&self, session: &SessionView) -> Result<()> {
            assert!(session.is_expired());
            self.events.lock().unwrap().push("expiration".into());
            Ok(())
        }
    }

    struct FailingListener;

    impl SessionListener for FailingListener {
        fn on_start(&self, _session: &SessionView) -> Result<()> {
            Err(SecurityError::Listener("boom".into()))
        }
    }

    struct Fixture {
        clock: ManualClock,
        store: Arc<MemorySessionStore>,
        listener: Arc<RecordingListener>,
        manager: Arc<SessionManager>,
    }

    fn fixture(configure: impl FnOnce(SessionManagerBuilder) -> SessionManagerBuilder) -> Fixture {
        let clock = ManualClock::default();
        let store = Arc::new(MemorySessionStore::new());
        let listener = Arc::new(RecordingListener::default());
        let builder = SessionManager::builder()
            .store(store.clone())
            .clock(Arc::new(clock.clone()))
            .listener(listener.clone())
            .session_validation_scheduler_enabled(false);
        let manager = configure(builder).build();
        Fixture {
            clock,
            store,
            listener,
            manager,
        }
    }

    #[tokio::test]
    async fn start_applies_global_timeout_and_notifies() {
        let fx = fixture(|b| b.global_session_timeout(5_000));

        let session = fx.manager.start(&SessionContext::new()).await.unwrap();

        assert_eq!(session.timeout().await.unwrap(), 5_000);
        assert_eq!(fx.listener.events(), vec!["start"]);
        assert_eq!(fx.store.len().await, 1);
    }

    #[tokio::test]
    async fn get_session_returns_none_for_unknown_ids() {
        let fx = fixture(|b| b);
        let key = SessionKey::new(SessionId::new_v4());

        assert!(fx.manager.get_session(&key).await.unwrap().is_none());
        assert!(matches!(
            fx.manager.touch(&key).await,
            Err(SecurityError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn expired_sessions_are_deleted_and_announced() {
        let fx = fixture(|b| b.global_session_timeout(1_000));
        let session = fx.manager.start(&SessionContext::new()).await.unwrap();

        fx.clock.advance_millis(1_000);

        let err = fx.manager.get_session(session.key()).await.unwrap_err();
        assert!(matches!(err, SecurityError::ExpiredSession(id) if id == session.id()));
        assert!(fx.store.is_empty().await);
        assert_eq!(fx.listener.events(), vec!["start", "expiration"]);
    }

    #[tokio::test]
    async fn expired_sessions_are_kept_when_deletion_is_disabled() {
        let fx = fixture(|b| b.global_session_timeout(1_000).delete_invalid_sessions(false));
        let session = fx.manager.start(&SessionContext::new()).await.unwrap();

        fx.clock.advance_millis(1_500);
        assert!(fx.manager.get_session(session.key()).await.is_err());

        let stored = fx.store.read_session(session.id()).await.unwrap().unwrap();
        assert!(stored.is_expired());
        assert!(stored.is_stopped());

        // A later read reports the terminal state, not a second expiry.
        assert!(matches!(
            fx.manager.get_session(session.key()).await,
            Err(SecurityError::StoppedSession(_))
        ));
    }

    #[tokio::test]
    async fn touch_extends_the_idle_window() {
        let fx = fixture(|b| b.global_session_timeout(1_000));
        let session = fx.manager.start(&SessionContext::new()).await.unwrap();

        fx.clock.advance_millis(800);
        session.touch().await.unwrap();
        fx.clock.advance_millis(800);

        assert!(fx.manager.get_session(session.key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stop_notifies_then_deletes() {
        let fx = fixture(|b| b);
        let session = fx.manager.start(&SessionContext::new()).await.unwrap();

        session.stop().await.unwrap();

        assert!(fx.store.is_empty().await);
        assert_eq!(fx.listener.events(), vec!["start", "stop"]);
        assert!(!fx.manager.is_valid(session.key()).await.unwrap());
    }

    #[tokio::test]
    async fn stopped_sessions_reject_mutation_when_kept() {
        let fx = fixture(|b| b.delete_invalid_sessions(false));
        let session = fx.manager.start(&SessionContext::new()).await.unwrap();
        session.set_attribute("role", Some("admin".into())).await.unwrap();

        session.stop().await.unwrap();

        assert!(matches!(
            session.touch().await,
            Err(SecurityError::StoppedSession(_))
        ));
        let stored = fx.store.read_session(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.attribute("role").and_then(|v| v.as_str()), Some("admin"));
        assert_eq!(stored.stop_timestamp(), Some(stored.last_access_time()));
    }

    #[tokio::test]
    async fn none_attribute_value_removes_the_key() {
        let fx = fixture(|b| b);
        let session = fx.manager.start(&SessionContext::new()).await.unwrap();

        session.set_attribute("role", Some("admin".into())).await.unwrap();
        session.set_attribute("role", None).await.unwrap();

        assert!(session.attribute("role").await.unwrap().is_none());
        assert!(session.attribute_keys().await.unwrap().is_empty());
        assert!(session.remove_attribute("role").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listener_failures_do_not_abort_start() {
        let fx = fixture(|b| b.listener(Arc::new(FailingListener)));

        let session = fx.manager.start(&SessionContext::new()).await;

        assert!(session.is_ok());
        assert_eq!(fx.listener.events(), vec!["start"]);
    }

    #[tokio::test]
    async fn validate_sessions_counts_only_expired_sessions() {
        let fx = fixture(|b| b.global_session_timeout(1_000));
        let mut keys = Vec::new();
        for _ in 0..3 {
            keys.push(fx.manager.start(&SessionContext::new()).await.unwrap());
        }

        fx.clock.advance_millis(600);
        keys[0].touch().await.unwrap();
        fx.clock.advance_millis(600);

        let invalidated = fx.manager.validate_sessions().await.unwrap();

        assert_eq!(invalidated, 2);
        assert_eq!(fx.store.len().await, 1);
        assert!(fx.manager.get_session(keys[0].key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deferred_updates_wait_for_flush() {
        let fx = fixture(|b| b.update_mode(UpdateMode::Deferred));
        let session = fx.manager.start(&SessionContext::new()).await.unwrap();

        session.set_attribute("role", Some("admin".into())).await.unwrap();

        let stored = fx.store.read_session(session.id()).await.unwrap().unwrap();
        assert!(stored.attribute("role").is_none());
        assert_eq!(
            session.attribute("role").await.unwrap().and_then(|v| v.as_str().map(String::from)),
            Some("admin".to_string())
        );
        assert_eq!(fx.manager.pending_updates(), 1);

        fx.manager.flush().await.unwrap();

        let stored = fx.store.read_session(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.attribute("role").and_then(|v| v.as_str()), Some("admin"));
        assert_eq!(fx.manager.pending_updates(), 0);
    }

    #[tokio::test]
    async fn scope_flushes_after_the_unit_of_work() {
        let fx = fixture(|b| b.update_mode(UpdateMode::Deferred));
        let session = fx.manager.start(&SessionContext::new()).await.unwrap();

        let value = fx
            .manager
            .scope(async {
                session.set_attribute("visits", Some(1i64.into())).await?;
                Ok(7)
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        let stored = fx.store.read_session(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.attribute("visits").and_then(|v| v.as_int()), Some(1));
    }

    #[tokio::test]
    async fn stop_discards_buffered_updates() {
        let fx = fixture(|b| b.update_mode(UpdateMode::Deferred));
        let session = fx.manager.start(&SessionContext::new()).await.unwrap();

        session.set_attribute("role", Some("admin".into())).await.unwrap();
        session.stop().await.unwrap();

        assert_eq!(fx.manager.pending_updates(), 0);
        assert!(fx.store.is_empty().await);
    }

    #[tokio::test]
    async fn first_use_enables_the_scheduler() {
        let manager = SessionManager::builder().build();
        assert!(!manager.scheduler().is_enabled());

        manager.start(&SessionContext::new()).await.unwrap();
        assert!(manager.scheduler().is_enabled());

        manager.shutdown();
        assert!(!manager.scheduler().is_enabled());
    }
}
