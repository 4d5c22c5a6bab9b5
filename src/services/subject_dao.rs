use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::models::session::AttributeValue;
use crate::services::subject::Subject;

/// Session attribute holding the subject's principals.
pub const PRINCIPALS_SESSION_KEY: &str = "gatekeeper.subject.principals";
/// Session attribute holding the subject's authenticated flag.
pub const AUTHENTICATED_SESSION_KEY: &str = "gatekeeper.subject.authenticated";

/// Decides whether a subject's state may be stored in its session.
pub trait SessionStorageEvaluator: Send + Sync {
    fn is_session_storage_enabled(&self, subject: &Subject) -> bool;
}

/// A single global switch, on by default.
#[derive(Debug)]
pub struct DefaultSessionStorageEvaluator {
    enabled: AtomicBool,
}

impl DefaultSessionStorageEvaluator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_session_storage_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl Default for DefaultSessionStorageEvaluator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SessionStorageEvaluator for DefaultSessionStorageEvaluator {
    fn is_session_storage_enabled(&self, _subject: &Subject) -> bool {
        self.is_enabled()
    }
}

/// Persists subject state between requests.
#[async_trait]
pub trait SubjectDao: Send + Sync {
    /// Stores the subject's principals and authenticated flag, if allowed.
    async fn save(&self, subject: &mut Subject) -> Result<()>;

    /// Removes any subject state stored in the subject's session.
    async fn delete(&self, subject: &Subject) -> Result<()>;
}

/// Stores subject state as session attributes, writing only what changed.
///
/// A session is started only when there is something to store. The
/// original principals are stored, never a run-as identity.
pub struct DefaultSubjectDao {
    evaluator: Arc<dyn SessionStorageEvaluator>,
}

impl DefaultSubjectDao {
    pub fn new(evaluator: Arc<dyn SessionStorageEvaluator>) -> Self {
        Self { evaluator }
    }

    pub fn session_storage_evaluator(&self) -> &Arc<dyn SessionStorageEvaluator> {
        &self.evaluator
    }

    async fn merge_principals(&self, subject: &mut Subject) -> Result<()> {
        let current = subject.original_principals().cloned();

        let Some(session) = subject.session().cloned() else {
            if let Some(principals) = current {
                let session = subject.get_or_create_session().await?;
                session
                    .set_attribute(PRINCIPALS_SESSION_KEY, Some(AttributeValue::Principals(principals)))
                    .await?;
            }
            return Ok(());
        };

        let existing = session.attribute(PRINCIPALS_SESSION_KEY).await?;
        match current {
            None => {
                if existing.is_some() {
                    session.remove_attribute(PRINCIPALS_SESSION_KEY).await?;
                }
            }
            Some(principals) => {
                if existing.as_ref().and_then(AttributeValue::as_principals) != Some(&principals) {
                    session
                        .set_attribute(PRINCIPALS_SESSION_KEY, Some(AttributeValue::Principals(principals)))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn merge_authentication_state(&self, subject: &mut Subject) -> Result<()> {
        let Some(session) = subject.session().cloned() else {
            if subject.is_authenticated() {
                let session = subject.get_or_create_session().await?;
                session
                    .set_attribute(AUTHENTICATED_SESSION_KEY, Some(true.into()))
                    .await?;
            }
            return Ok(());
        };

        let existing = session.attribute(AUTHENTICATED_SESSION_KEY).await?;
        if subject.is_authenticated() {
            if existing.as_ref().and_then(AttributeValue::as_bool) != Some(true) {
                session
                    .set_attribute(AUTHENTICATED_SESSION_KEY, Some(true.into()))
                    .await?;
            }
        } else if existing.is_some() {
            session.remove_attribute(AUTHENTICATED_SESSION_KEY).await?;
        }
        Ok(())
    }
}

impl Default for DefaultSubjectDao {
    fn default() -> Self {
        Self::new(Arc::new(DefaultSessionStorageEvaluator::default()))
    }
}

#[async_trait]
impl SubjectDao for DefaultSubjectDao {
    async fn save(&self, subject: &mut Subject) -> Result<()> {
        if !self.evaluator.is_session_storage_enabled(subject) {
            tracing::trace!("Session storage of subject state is disabled for this subject");
            return Ok(());
        }
        self.merge_principals(subject).await?;
        self.merge_authentication_state(subject).await
    }

    async fn delete(&self, subject: &Subject) -> Result<()> {
        if let Some(session) = subject.session() {
            session.remove_attribute(AUTHENTICATED_SESSION_KEY).await?;
            session.remove_attribute(PRINCIPALS_SESSION_KEY).await?;
        }
        Ok(())
    }
}
