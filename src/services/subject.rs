use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SecurityError};
use crate::models::principal::PrincipalSet;
use crate::models::session::{SessionContext, SessionId, SessionKey};
use crate::services::remember_me::RememberMeSink;
use crate::services::session_manager::{Session, SessionManager};

/// The inputs used to build a `Subject` for one request.
#[derive(Clone)]
pub struct SubjectContext {
    pub session_id: Option<SessionId>,
    pub session: Option<Session>,
    pub principals: Option<PrincipalSet>,
    pub authenticated: bool,
    pub host: Option<String>,
    pub session_creation_enabled: bool,
    pub remember_me_sink: Option<Arc<dyn RememberMeSink>>,
}

impl Default for SubjectContext {
    fn default() -> Self {
        Self {
            session_id: None,
            session: None,
            principals: None,
            authenticated: false,
            host: None,
            session_creation_enabled: true,
            remember_me_sink: None,
        }
    }
}

impl SubjectContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_principals(mut self, principals: PrincipalSet) -> Self {
        self.principals = Some(principals);
        self
    }

    pub fn with_authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_session_creation_enabled(mut self, enabled: bool) -> Self {
        self.session_creation_enabled = enabled;
        self
    }

    pub fn with_remember_me_sink(mut self, sink: Arc<dyn RememberMeSink>) -> Self {
        self.remember_me_sink = Some(sink);
        self
    }

    pub fn remember_me_sink(&self) -> Option<&Arc<dyn RememberMeSink>> {
        self.remember_me_sink.as_ref()
    }

    /// The key of the session this context refers to, if any.
    pub fn session_key(&self) -> Option<SessionKey> {
        self.session
            .as_ref()
            .map(|session| *session.key())
            .or_else(|| self.session_id.map(SessionKey::new))
    }
}

impl From<&Subject> for SubjectContext {
    /// Carries the session, host and sink of an existing subject over to a new one.
    fn from(subject: &Subject) -> Self {
        Self {
            session_id: subject.session.as_ref().map(Session::id),
            session: subject.session.clone(),
            principals: None,
            authenticated: false,
            host: subject.host.clone(),
            session_creation_enabled: subject.session_creation_enabled,
            remember_me_sink: subject.remember_me_sink.clone(),
        }
    }
}

/// The identity executing the current request, authenticated or not.
///
/// While running as another identity, `principals` returns the assumed
/// identity and `original_principals` the one that logged in.
#[derive(Clone)]
pub struct Subject {
    session_manager: Arc<SessionManager>,
    principals: Option<PrincipalSet>,
    run_as: Vec<PrincipalSet>,
    authenticated: bool,
    host: Option<String>,
    session: Option<Session>,
    session_creation_enabled: bool,
    remember_me_sink: Option<Arc<dyn RememberMeSink>>,
}

impl Subject {
    /// Creates an anonymous subject without a session.
    pub fn new(session_manager: Arc<SessionManager>) -> Self {
        Self {
            session_manager,
            principals: None,
            run_as: Vec::new(),
            authenticated: false,
            host: None,
            session: None,
            session_creation_enabled: true,
            remember_me_sink: None,
        }
    }

    pub fn with_principals(mut self, principals: Option<PrincipalSet>) -> Self {
        self.principals = principals.filter(|p| !p.is_empty());
        self
    }

    pub fn with_authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host = host;
        self
    }

    pub fn with_session(mut self, session: Option<Session>) -> Self {
        self.session = session;
        self
    }

    pub fn with_session_creation_enabled(mut self, enabled: bool) -> Self {
        self.session_creation_enabled = enabled;
        self
    }

    pub fn with_remember_me_sink(mut self, sink: Option<Arc<dyn RememberMeSink>>) -> Self {
        self.remember_me_sink = sink;
        self
    }

    /// The effective identity: the assumed one while running as, otherwise the original.
    pub fn principals(&self) -> Option<&PrincipalSet> {
        self.run_as.last().or(self.principals.as_ref())
    }

    /// The identity the subject authenticated or was remembered as.
    pub fn original_principals(&self) -> Option<&PrincipalSet> {
        self.principals.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Known from a remembered identity rather than a login in this session.
    pub fn is_remembered(&self) -> bool {
        self.principals.is_some() && !self.authenticated
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_session_creation_enabled(&self) -> bool {
        self.session_creation_enabled
    }

    pub fn remember_me_sink(&self) -> Option<&Arc<dyn RememberMeSink>> {
        self.remember_me_sink.as_ref()
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    /// Returns the subject's session, starting one if it has none.
    pub async fn get_or_create_session(&mut self) -> Result<Session> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }
        if !self.session_creation_enabled {
            return Err(SecurityError::Internal(
                "Session creation has been disabled for the current subject".to_string(),
            ));
        }

        let mut context = SessionContext::new();
        if let Some(host) = &self.host {
            context = context.with_host(host.clone());
        }
        tracing::trace!("Starting session for host {:?}", self.host);
        let session = self.session_manager.start(&context).await?;
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Assumes `principals` on top of the current identity.
    pub fn run_as(&mut self, principals: PrincipalSet) -> Result<()> {
        if self.principals.is_none() {
            return Err(SecurityError::Authentication(
                "This subject does not yet have an identity. Assuming the identity of another \
                 subject is only allowed for subjects with an existing identity."
                    .to_string(),
            ));
        }
        if principals.is_empty() {
            return Err(SecurityError::Authentication(
                "Specified subject principals cannot be empty".to_string(),
            ));
        }
        self.run_as.push(principals);
        Ok(())
    }

    pub fn is_run_as(&self) -> bool {
        !self.run_as.is_empty()
    }

    /// The identity in effect before the current run-as, if any.
    pub fn previous_principals(&self) -> Option<&PrincipalSet> {
        match self.run_as.len() {
            0 => None,
            1 => self.principals.as_ref(),
            n => self.run_as.get(n - 2),
        }
    }

    /// Drops the most recently assumed identity and returns it.
    pub fn release_run_as(&mut self) -> Option<PrincipalSet> {
        self.run_as.pop()
    }

    /// Forgets the identity and session after a logout.
    pub(crate) fn clear(&mut self) {
        self.principals = None;
        self.run_as.clear();
        self.authenticated = false;
        self.session = None;
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("principals", &self.principals())
            .field("run_as", &self.is_run_as())
            .field("authenticated", &self.authenticated)
            .field("host", &self.host)
            .field("session", &self.session.as_ref().map(Session::id))
            .finish()
    }
}
