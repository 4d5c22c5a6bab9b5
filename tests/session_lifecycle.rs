mod common;

use std::sync::Arc;

use gatekeeper::models::session::{AttributeValue, SessionContext, SessionKey};
use gatekeeper::repositories::cache::{CachingSessionStore, MemoryCacheManager};
use gatekeeper::repositories::session::{MemorySessionStore, SessionStore};
use gatekeeper::services::session_manager::{Session, SessionManager};
use gatekeeper::services::subject::Subject;
use gatekeeper::services::subject_dao::{
    DefaultSessionStorageEvaluator, DefaultSubjectDao, SubjectDao, AUTHENTICATED_SESSION_KEY,
    PRINCIPALS_SESSION_KEY,
};
use gatekeeper::services::validation::ValidatingSessionManager;
use gatekeeper::{PrincipalSet, SecurityError};

#[tokio::test]
async fn idle_session_expires_after_its_timeout() {
    let h = common::harness(true);
    let session = h
        .manager
        .start(&SessionContext::new().with_host("10.0.0.1"))
        .await
        .unwrap();
    session.set_timeout(1_000).await.unwrap();

    let found = h.manager.get_session(session.key()).await.unwrap().unwrap();
    assert_eq!(found.host().await.unwrap().as_deref(), Some("10.0.0.1"));

    h.clock.advance_millis(1_500);

    let err = h.manager.get_session(session.key()).await.unwrap_err();
    assert!(matches!(err, SecurityError::ExpiredSession(id) if id == session.id()));
    assert!(err.is_invalid_session());
}

#[tokio::test]
async fn touch_after_stop_fails_and_leaves_attributes_alone() {
    let h = common::harness(false);
    let session = h.manager.start(&SessionContext::new()).await.unwrap();
    session
        .set_attribute("role", Some("admin".into()))
        .await
        .unwrap();

    session.stop().await.unwrap();
    let err = session.touch().await.unwrap_err();

    assert!(matches!(err, SecurityError::StoppedSession(_)));
    let record = h.store.read_session(session.id()).await.unwrap().unwrap();
    assert_eq!(record.attribute("role").and_then(|v| v.as_str()), Some("admin"));
    assert_eq!(record.attribute_keys().len(), 1);
}

#[tokio::test]
async fn touch_after_stop_with_deletion_reports_an_invalid_session() {
    let h = common::harness(true);
    let session = h.manager.start(&SessionContext::new()).await.unwrap();

    session.stop().await.unwrap();
    let err = session.touch().await.unwrap_err();

    assert!(err.is_invalid_session());
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn handles_for_the_same_key_share_state() {
    let h = common::harness(true);
    let first = h.manager.start(&SessionContext::new()).await.unwrap();
    first
        .set_attribute("role", Some("admin".into()))
        .await
        .unwrap();

    let second = Session::new(h.manager.clone(), SessionKey::new(first.id()));
    assert_eq!(
        second.attribute("role").await.unwrap(),
        Some(AttributeValue::Text("admin".to_string()))
    );

    second
        .set_attribute("role", Some("auditor".into()))
        .await
        .unwrap();
    assert_eq!(
        first.attribute("role").await.unwrap().and_then(|v| v.as_str().map(String::from)),
        Some("auditor".to_string())
    );
}

#[tokio::test]
async fn disabled_storage_never_creates_or_overwrites_sessions() {
    let h = common::harness(true);
    let dao = DefaultSubjectDao::new(Arc::new(DefaultSessionStorageEvaluator::new(false)));

    let mut without_session = Subject::new(h.manager.clone())
        .with_principals(Some(PrincipalSet::from_principal("jsmith", "ldap")))
        .with_authenticated(true);
    dao.save(&mut without_session).await.unwrap();
    assert!(without_session.session().is_none());
    assert!(h.store.is_empty().await);

    let session = h.manager.start(&SessionContext::new()).await.unwrap();
    let previous = PrincipalSet::from_principal("previous", "ldap");
    session
        .set_attribute(PRINCIPALS_SESSION_KEY, Some(previous.clone().into()))
        .await
        .unwrap();

    let mut with_session = Subject::new(h.manager.clone())
        .with_principals(Some(PrincipalSet::from_principal("jsmith", "ldap")))
        .with_authenticated(true)
        .with_session(Some(session.clone()));
    dao.save(&mut with_session).await.unwrap();

    let stored = session.attribute(PRINCIPALS_SESSION_KEY).await.unwrap();
    assert_eq!(stored.as_ref().and_then(AttributeValue::as_principals), Some(&previous));
    assert!(session.attribute(AUTHENTICATED_SESSION_KEY).await.unwrap().is_none());
}

async fn start_many(manager: &Arc<SessionManager>, n: usize) -> Vec<Session> {
    let mut sessions = Vec::with_capacity(n);
    for _ in 0..n {
        sessions.push(manager.start(&SessionContext::new()).await.unwrap());
    }
    sessions
}

#[tokio::test]
async fn sweep_invalidates_exactly_the_expired_sessions() {
    for expired in [0usize, 3, 5] {
        let h = common::harness(true);
        let sessions = start_many(&h.manager, 5).await;
        for session in &sessions {
            session.set_timeout(10_000).await.unwrap();
        }

        h.clock.advance_millis(6_000);
        for session in &sessions[expired..] {
            session.touch().await.unwrap();
        }
        h.clock.advance_millis(6_000);

        let invalidated = h.manager.validate_sessions().await.unwrap();

        assert_eq!(invalidated, expired);
        assert_eq!(h.store.len().await, 5 - expired);
    }
}

#[tokio::test]
async fn sweep_works_through_a_cached_store() {
    common::init_tracing();
    let clock = gatekeeper::ManualClock::default();
    let backing = Arc::new(MemorySessionStore::new());
    let store = Arc::new(CachingSessionStore::new(backing.clone()));
    let manager = SessionManager::builder()
        .store(store.clone())
        .cache_manager(Arc::new(MemoryCacheManager::new()))
        .clock(Arc::new(clock.clone()))
        .global_session_timeout(1_000)
        .session_validation_scheduler_enabled(false)
        .build();

    let sessions = start_many(&manager, 4).await;
    assert!(store.active_sessions_cache().is_some());

    clock.advance_millis(500);
    sessions[0].touch().await.unwrap();
    clock.advance_millis(700);

    assert_eq!(manager.validate_sessions().await.unwrap(), 3);
    assert_eq!(store.active_sessions().await.unwrap().len(), 1);
    assert_eq!(backing.len().await, 1);
}
