//! Server-side sessions and subject identity persistence.
//!
//! A [`SecurityManager`] resolves the [`Subject`] behind each request from its
//! session or a remembered identity, and drives login and logout. Sessions are
//! created, validated and expired by the [`SessionManager`], backed by any
//! [`SessionStore`](repositories::session::SessionStore).

pub mod clock;
pub mod config;
pub mod error;
pub mod serializer;

pub mod crypto {
    pub mod aes;
    pub mod cipher;
}

pub mod models {
    pub mod principal;
    pub mod session;
    pub mod token;
}

pub mod repositories {
    pub mod cache;
    pub mod redis_store;
    pub mod session;
}

pub mod services {
    pub mod listener;
    pub mod remember_me;
    pub mod security_manager;
    pub mod session_factory;
    pub mod session_manager;
    pub mod subject;
    pub mod subject_dao;
    pub mod validation;
}

pub mod middleware_layer {
    pub mod session;
}

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SecurityConfig, UpdateMode};
pub use error::{Result, SecurityError};
pub use models::principal::PrincipalSet;
pub use models::session::{AttributeValue, SessionContext, SessionId, SessionKey, SessionRecord};
pub use models::token::{AuthenticationInfo, AuthenticationToken};
pub use services::remember_me::{RememberMeManager, RememberMeSink};
pub use services::security_manager::{Authenticator, SecurityManager};
pub use services::session_manager::{Session, SessionManager};
pub use services::subject::{Subject, SubjectContext};
