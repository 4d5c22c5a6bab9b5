use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose, Engine as _};
use http::HeaderName;
use std::sync::Arc;
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};

use crate::error::{Result, SecurityError};
use crate::models::session::SessionId;
use crate::services::remember_me::RememberMeSink;
use crate::services::security_manager::SecurityManager;
use crate::services::subject::SubjectContext;

/// The cookie carrying the session id.
pub const SESSION_ID_COOKIE: &str = "session_id";
/// The cookie carrying the remembered identity.
pub const REMEMBER_ME_COOKIE: &str = "rememberMe";
/// How long a remembered identity cookie lives (3 years).
pub const REMEMBER_ME_MAX_AGE_DAYS: i64 = 365 * 3;

const FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Creates an http-only cookie scoped to the whole site.
///
/// Without a `max_age` the cookie lasts for the browser session.
fn create_cookie(name: &str, value: String, max_age: Option<Duration>) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_string(), value);
    cookie.set_http_only(true);
    cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
    if let Some(max_age) = max_age {
        cookie.set_max_age(max_age);
    }
    cookie.set_path("/");
    cookie
}

fn removal_cookie(name: &str) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_string(), "");
    cookie.set_max_age(Duration::seconds(0));
    cookie.set_path("/");
    cookie
}

/// Keeps the remembered identity in the `rememberMe` cookie, base64 URL-safe encoded.
#[derive(Clone)]
pub struct CookieRememberMeSink {
    cookies: Cookies,
    name: String,
    max_age: Duration,
}

impl CookieRememberMeSink {
    pub fn new(cookies: Cookies) -> Self {
        Self {
            cookies,
            name: REMEMBER_ME_COOKIE.to_string(),
            max_age: Duration::days(REMEMBER_ME_MAX_AGE_DAYS),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

#[async_trait]
impl RememberMeSink for CookieRememberMeSink {
    async fn put(&self, bytes: &[u8]) -> Result<()> {
        let encoded = general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        self.cookies
            .add(create_cookie(&self.name, encoded, Some(self.max_age)));
        Ok(())
    }

    async fn get(&self) -> Result<Option<Vec<u8>>> {
        let Some(cookie) = self.cookies.get(&self.name) else {
            return Ok(None);
        };

        // Clients and proxies may or may not keep the padding.
        let value = cookie.value().trim_end_matches('=');
        if value.is_empty() {
            return Ok(None);
        }
        general_purpose::URL_SAFE_NO_PAD
            .decode(value)
            .map(Some)
            .map_err(|e| SecurityError::Serialization(format!("Invalid rememberMe cookie: {}", e)))
    }

    async fn remove(&self) -> Result<()> {
        if self.cookies.get(&self.name).is_some() {
            self.cookies.remove(removal_cookie(&self.name));
        }
        Ok(())
    }
}

/// Sets the session id cookie for `session_id`.
pub fn write_session_cookie(cookies: &Cookies, session_id: SessionId, max_age: Duration) {
    cookies.add(create_cookie(SESSION_ID_COOKIE, session_id.to_string(), Some(max_age)));
    tracing::debug!("✅ Session cookie added: session_id={}", session_id);
}

fn issue_session_cookie(cookies: &Cookies, session_id: SessionId) {
    cookies.add(create_cookie(SESSION_ID_COOKIE, session_id.to_string(), None));
    tracing::debug!("✅ Session cookie issued: session_id={}", session_id);
}

pub fn clear_session_cookie(cookies: &Cookies) {
    cookies.remove(removal_cookie(SESSION_ID_COOKIE));
}

fn extract_session_id(cookies: &Cookies) -> Option<SessionId> {
    cookies
        .get(SESSION_ID_COOKIE)
        .and_then(|cookie| SessionId::parse_str(cookie.value()))
}

fn extract_host(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
}

/// A middleware that builds the request's `Subject` and stores it in the request extensions.
///
/// # Arguments
///
/// * `security` - The security manager.
/// * `cookies` - The request cookies.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The handler's `Response`. Deferred session updates are flushed before it is returned.
pub async fn resolve_subject(
    State(security): State<Arc<SecurityManager>>,
    cookies: Cookies,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let session_id = extract_session_id(&cookies);
    let mut context = SubjectContext::new()
        .with_remember_me_sink(Arc::new(CookieRememberMeSink::new(cookies.clone())));
    if let Some(id) = session_id {
        tracing::debug!("🔑 Found session_id: {}", id);
        context = context.with_session_id(id);
    }
    if let Some(host) = extract_host(&req) {
        context = context.with_host(host);
    }

    let subject = match security.create_subject(context).await {
        Ok(subject) => subject,
        Err(e) => {
            tracing::error!("❌ Failed to resolve subject: {}", e);
            return e.into_response();
        }
    };

    match subject.session() {
        Some(session) => {
            if session_id != Some(session.id()) {
                issue_session_cookie(&cookies, session.id());
            }
            if let Err(e) = session.touch().await {
                tracing::warn!("⚠️ Failed to touch session {}: {}", session.id(), e);
            }
        }
        None if session_id.is_some() => {
            tracing::debug!("Session cookie no longer refers to a valid session, clearing it");
            clear_session_cookie(&cookies);
        }
        None => {}
    }

    req.extensions_mut().insert(subject);
    let response = next.run(req).await;

    if let Err(e) = security.session_manager().flush().await {
        tracing::error!("❌ Failed to flush deferred session updates: {}", e);
    }
    response
}
