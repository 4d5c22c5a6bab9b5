#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Once};

use gatekeeper::clock::ManualClock;
use gatekeeper::repositories::session::MemorySessionStore;
use gatekeeper::services::session_manager::SessionManager;
use gatekeeper::{AuthenticationInfo, AuthenticationToken, Authenticator, PrincipalSet, Result, SecurityError};

static TRACING: Once = Once::new();

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct Harness {
    pub clock: ManualClock,
    pub store: Arc<MemorySessionStore>,
    pub manager: Arc<SessionManager>,
}

/// A manager over an in-memory store and a manual clock, with the sweep disabled.
pub fn harness(delete_invalid_sessions: bool) -> Harness {
    init_tracing();
    let clock = ManualClock::default();
    let store = Arc::new(MemorySessionStore::new());
    let manager = SessionManager::builder()
        .store(store.clone())
        .clock(Arc::new(clock.clone()))
        .delete_invalid_sessions(delete_invalid_sessions)
        .session_validation_scheduler_enabled(false)
        .build();
    Harness {
        clock,
        store,
        manager,
    }
}

/// Accepts `jsmith` / `secret` only.
pub struct StaticAuthenticator;

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &AuthenticationToken) -> Result<AuthenticationInfo> {
        if token.principal == "jsmith" && token.credentials.as_slice() == b"secret" {
            let mut principals = PrincipalSet::from_principal("jsmith", "ldap");
            principals.add("1001", "db");
            Ok(AuthenticationInfo::new(principals))
        } else {
            Err(SecurityError::Authentication("Invalid credentials".to_string()))
        }
    }
}
