use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{SecurityConfig, UpdateMode};
use crate::error::{Result, SecurityError};
use crate::models::principal::PrincipalSet;
use crate::models::session::AttributeValue;
use crate::models::token::{AuthenticationInfo, AuthenticationToken};
use crate::repositories::cache::CacheManager;
use crate::repositories::session::SessionStore;
use crate::services::listener::{AuthenticationListener, SessionListener};
use crate::services::remember_me::RememberMeManager;
use crate::services::session_manager::{Session, SessionManager, SessionManagerBuilder};
use crate::services::subject::{Subject, SubjectContext};
use crate::services::subject_dao::{
    DefaultSessionStorageEvaluator, DefaultSubjectDao, SubjectDao, AUTHENTICATED_SESSION_KEY,
    PRINCIPALS_SESSION_KEY,
};

/// Verifies submitted credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns the account's principals, or `SecurityError::Authentication`.
    async fn authenticate(&self, token: &AuthenticationToken) -> Result<AuthenticationInfo>;
}

/// Builds subjects and drives login and logout across sessions, subject
/// persistence and remember-me.
pub struct SecurityManager {
    session_manager: Arc<SessionManager>,
    subject_dao: Arc<dyn SubjectDao>,
    remember_me: Option<Arc<RememberMeManager>>,
    authenticator: Arc<dyn Authenticator>,
    listeners: Vec<Arc<dyn AuthenticationListener>>,
}

impl SecurityManager {
    pub fn builder(authenticator: Arc<dyn Authenticator>) -> SecurityManagerBuilder {
        SecurityManagerBuilder::new(authenticator)
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    pub fn subject_dao(&self) -> &Arc<dyn SubjectDao> {
        &self.subject_dao
    }

    pub fn remember_me_manager(&self) -> Option<&Arc<RememberMeManager>> {
        self.remember_me.as_ref()
    }

    /// Resolves the subject described by `context` and saves its state.
    ///
    /// The session comes from the context or its session id; an invalid
    /// session is treated as absent. Principals come from the context, then
    /// the session, then remember-me.
    pub async fn create_subject(&self, context: SubjectContext) -> Result<Subject> {
        let session = self.resolve_session(&context).await?;
        let principals = self.resolve_principals(&context, session.as_ref()).await?;
        let authenticated = context.authenticated || self.session_authenticated(session.as_ref()).await?;

        let host = match (&context.host, &session) {
            (Some(host), _) => Some(host.clone()),
            (None, Some(session)) => session.host().await?,
            (None, None) => None,
        };

        let mut subject = Subject::new(Arc::clone(&self.session_manager))
            .with_principals(principals)
            .with_authenticated(authenticated)
            .with_host(host)
            .with_session(session)
            .with_session_creation_enabled(context.session_creation_enabled)
            .with_remember_me_sink(context.remember_me_sink.clone());

        self.subject_dao.save(&mut subject).await?;
        Ok(subject)
    }

    /// Authenticates `token` on behalf of `subject`.
    ///
    /// # Arguments
    ///
    /// * `subject` - The subject performing the login; its session and sink are kept.
    /// * `token` - The submitted credentials.
    ///
    /// # Returns
    ///
    /// A `Result` containing the authenticated subject.
    pub async fn login(&self, subject: &Subject, token: &AuthenticationToken) -> Result<Subject> {
        let info = match self.authenticator.authenticate(token).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("❌ Login failed for {}: {}", token.principal, e);
                self.notify_failure(token, &e);
                if let Some(rm) = &self.remember_me {
                    if let Err(hook) = rm.on_failed_login(subject, token, &e).await {
                        tracing::warn!(
                            "⚠️ Remember-me failed to forget identity after failed login: {}",
                            hook
                        );
                    }
                }
                return Err(e);
            }
        };
        self.notify_success(token, &info);

        let mut context = SubjectContext::from(subject)
            .with_principals(info.principals.clone())
            .with_authenticated(true);
        if let Some(host) = &token.host {
            context = context.with_host(host.clone());
        }

        let logged_in = self.create_subject(context).await?;

        if let Some(rm) = &self.remember_me {
            if let Err(e) = rm.on_successful_login(&logged_in, token, &info).await {
                tracing::warn!("⚠️ Remember-me failed to remember identity: {}", e);
            }
        }

        tracing::info!("✅ Login successful: {:?}", info.principals.primary());
        Ok(logged_in)
    }

    /// Logs `subject` out: forgets its remembered identity, removes its
    /// stored state and stops its session.
    ///
    /// Failures along the way are logged; the subject always ends up anonymous.
    pub async fn logout(&self, subject: &mut Subject) -> Result<()> {
        if let Some(rm) = &self.remember_me {
            if let Err(e) = rm.on_logout(subject).await {
                tracing::warn!("⚠️ Remember-me failed to forget identity on logout: {}", e);
            }
        }

        self.notify_logout(subject.original_principals());

        if let Err(e) = self.subject_dao.delete(subject).await {
            tracing::debug!("Unable to remove subject state from the session during logout: {}", e);
        }

        if let Some(session) = subject.session() {
            match session.stop().await {
                Ok(()) => {}
                Err(e) if e.is_invalid_session() => {
                    tracing::debug!("Session already invalid during logout: {}", e);
                }
                Err(e) => {
                    tracing::warn!("⚠️ Unable to stop session {} during logout: {}", session.id(), e);
                }
            }
        }

        subject.clear();
        tracing::info!("✅ Logout successful");
        Ok(())
    }

    async fn resolve_session(&self, context: &SubjectContext) -> Result<Option<Session>> {
        let Some(key) = context.session_key() else {
            return Ok(None);
        };
        match self.session_manager.get_session(&key).await {
            Ok(session) => Ok(session),
            Err(e) if e.is_invalid_session() => {
                tracing::debug!("Ignoring invalid session while building subject: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_principals(
        &self,
        context: &SubjectContext,
        session: Option<&Session>,
    ) -> Result<Option<PrincipalSet>> {
        if let Some(principals) = context.principals.as_ref().filter(|p| !p.is_empty()) {
            return Ok(Some(principals.clone()));
        }

        if let Some(session) = session {
            if let Some(AttributeValue::Principals(principals)) =
                session.attribute(PRINCIPALS_SESSION_KEY).await?
            {
                if !principals.is_empty() {
                    return Ok(Some(principals));
                }
            }
        }

        let Some(rm) = &self.remember_me else {
            return Ok(None);
        };
        match rm.get_remembered_principals(context).await {
            Ok(principals) => {
                if principals.is_some() {
                    tracing::debug!("Found remembered principals for subject");
                }
                Ok(principals)
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️ Delegate RememberMeManager instance threw an exception during getRememberedPrincipals(): {}",
                    e
                );
                Ok(None)
            }
        }
    }

    async fn session_authenticated(&self, session: Option<&Session>) -> Result<bool> {
        let Some(session) = session else {
            return Ok(false);
        };
        Ok(session
            .attribute(AUTHENTICATED_SESSION_KEY)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    fn notify_success(&self, token: &AuthenticationToken, info: &AuthenticationInfo) {
        for listener in &self.listeners {
            if let Err(e) = listener.on_success(token, info) {
                tracing::warn!("⚠️ Authentication listener failed on success: {}", e);
            }
        }
    }

    fn notify_failure(&self, token: &AuthenticationToken, error: &SecurityError) {
        for listener in &self.listeners {
            if let Err(e) = listener.on_failure(token, error) {
                tracing::warn!("⚠️ Authentication listener failed on failure: {}", e);
            }
        }
    }

    fn notify_logout(&self, principals: Option<&PrincipalSet>) {
        for listener in &self.listeners {
            if let Err(e) = listener.on_logout(principals) {
                tracing::warn!("⚠️ Authentication listener failed on logout: {}", e);
            }
        }
    }
}

/// The composition root: assembles the session manager, subject
/// persistence and remember-me around one `Authenticator`.
pub struct SecurityManagerBuilder {
    authenticator: Arc<dyn Authenticator>,
    sessions: SessionManagerBuilder,
    subject_dao: Option<Arc<dyn SubjectDao>>,
    session_storage_enabled: bool,
    remember_me: Option<Arc<RememberMeManager>>,
    listeners: Vec<Arc<dyn AuthenticationListener>>,
}

impl SecurityManagerBuilder {
    fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            sessions: SessionManager::builder(),
            subject_dao: None,
            session_storage_enabled: true,
            remember_me: Some(Arc::new(RememberMeManager::new())),
            listeners: Vec::new(),
        }
    }

    /// Applies session, storage and cipher key settings from `config`.
    pub fn config(mut self, config: &SecurityConfig) -> Self {
        self.sessions = self.sessions.config(config);
        self.session_storage_enabled = config.session_storage_enabled;
        self.remember_me = Some(Arc::new(RememberMeManager::from_config(config)));
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = self.sessions.store(store);
        self
    }

    /// Pushed into the session store if it accepts one.
    pub fn cache_manager(mut self, cache_manager: Arc<dyn CacheManager>) -> Self {
        self.sessions = self.sessions.cache_manager(cache_manager);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.sessions = self.sessions.clock(clock);
        self
    }

    pub fn session_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.sessions = self.sessions.listener(listener);
        self
    }

    pub fn global_session_timeout(mut self, timeout: i64) -> Self {
        self.sessions = self.sessions.global_session_timeout(timeout);
        self
    }

    pub fn session_validation_interval(mut self, interval: Duration) -> Self {
        self.sessions = self.sessions.session_validation_interval(interval);
        self
    }

    pub fn session_validation_scheduler_enabled(mut self, enabled: bool) -> Self {
        self.sessions = self.sessions.session_validation_scheduler_enabled(enabled);
        self
    }

    pub fn delete_invalid_sessions(mut self, delete: bool) -> Self {
        self.sessions = self.sessions.delete_invalid_sessions(delete);
        self
    }

    pub fn update_mode(mut self, mode: UpdateMode) -> Self {
        self.sessions = self.sessions.update_mode(mode);
        self
    }

    /// Replaces the default session-attribute subject persistence.
    pub fn subject_dao(mut self, dao: Arc<dyn SubjectDao>) -> Self {
        self.subject_dao = Some(dao);
        self
    }

    pub fn session_storage_enabled(mut self, enabled: bool) -> Self {
        self.session_storage_enabled = enabled;
        self
    }

    /// `None` disables remember-me entirely.
    pub fn remember_me_manager(mut self, manager: Option<Arc<RememberMeManager>>) -> Self {
        self.remember_me = manager;
        self
    }

    pub fn authentication_listener(mut self, listener: Arc<dyn AuthenticationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> SecurityManager {
        let subject_dao = self.subject_dao.unwrap_or_else(|| {
            Arc::new(DefaultSubjectDao::new(Arc::new(
                DefaultSessionStorageEvaluator::new(self.session_storage_enabled),
            )))
        });

        SecurityManager {
            session_manager: self.sessions.build(),
            subject_dao,
            remember_me: self.remember_me,
            authenticator: self.authenticator,
            listeners: self.listeners,
        }
    }
}
