use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, SecurityError};
use crate::models::principal::PrincipalSet;

/// Milliseconds per minute.
pub const MILLIS_PER_MINUTE: i64 = 60 * 1000;
/// The idle timeout applied to new sessions unless configured otherwise (30 minutes).
pub const DEFAULT_GLOBAL_SESSION_TIMEOUT: i64 = 30 * MILLIS_PER_MINUTE;

/// The opaque unique identifier of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an id from its string form.
    pub fn parse_str(input: &str) -> Option<Self> {
        Uuid::parse_str(input).ok().map(Self)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A lookup key carrying only a session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    session_id: SessionId,
}

impl SessionKey {
    /// Creates a key for `session_id`.
    pub fn new(session_id: SessionId) -> Self {
        Self { session_id }
    }

    /// The id this key refers to.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl From<SessionId> for SessionKey {
    fn from(session_id: SessionId) -> Self {
        Self::new(session_id)
    }
}

/// A value stored under a session attribute key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Principals(PrincipalSet),
}

impl AttributeValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_principals(&self) -> Option<&PrincipalSet> {
        match self {
            AttributeValue::Principals(p) => Some(p),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self {
        AttributeValue::Bytes(value)
    }
}

impl From<PrincipalSet> for AttributeValue {
    fn from(value: PrincipalSet) -> Self {
        AttributeValue::Principals(value)
    }
}

/// Initialization data handed to a `SessionFactory` when a session starts.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// The originating host of the client that caused the session to start.
    pub host: Option<String>,
    /// Attributes the new session starts out with.
    pub attributes: HashMap<String, AttributeValue>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// The durable state of one session.
///
/// Records are only ever mutated by the `SessionManager`; clients interact
/// with sessions through the id-only `Session` handle. Store updates always
/// replace the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    id: Option<SessionId>,
    start_timestamp: DateTime<Utc>,
    stop_timestamp: Option<DateTime<Utc>>,
    last_access_time: DateTime<Utc>,
    /// Idle timeout in milliseconds. Negative means the session never expires.
    timeout: i64,
    expired: bool,
    host: Option<String>,
    attributes: Option<HashMap<String, AttributeValue>>,
}

impl SessionRecord {
    /// Creates a new, id-less record started at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            start_timestamp: now,
            stop_timestamp: None,
            last_access_time: now,
            timeout: DEFAULT_GLOBAL_SESSION_TIMEOUT,
            expired: false,
            host: None,
            attributes: None,
        }
    }

    /// Creates a new record originating from `host`.
    pub fn with_host(now: DateTime<Utc>, host: Option<String>) -> Self {
        Self {
            host,
            ..Self::new(now)
        }
    }

    pub fn id(&self) -> Option<SessionId> {
        self.id
    }

    /// Assigns the id. Only stores call this, from `create`.
    pub fn set_id(&mut self, id: SessionId) {
        self.id = Some(id);
    }

    pub fn start_timestamp(&self) -> DateTime<Utc> {
        self.start_timestamp
    }

    pub fn stop_timestamp(&self) -> Option<DateTime<Utc>> {
        self.stop_timestamp
    }

    pub fn last_access_time(&self) -> DateTime<Utc> {
        self.last_access_time
    }

    pub fn timeout(&self) -> i64 {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: i64) {
        self.timeout = timeout;
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Marks the session as accessed at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access_time = now.max(self.start_timestamp);
    }

    /// Sets the stop timestamp if it is not set yet. Returns whether anything changed.
    pub fn stop(&mut self, now: DateTime<Utc>) -> bool {
        if self.stop_timestamp.is_some() {
            return false;
        }
        self.stop_timestamp = Some(now.max(self.start_timestamp));
        true
    }

    /// Stops the session and flags it as expired. Repeated calls change nothing.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.stop(now);
        self.expired = true;
    }

    /// Aligns the last access time with the stop timestamp of a stopped session.
    pub(crate) fn mark_stop_access(&mut self) {
        if let Some(stopped) = self.stop_timestamp {
            self.last_access_time = stopped;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_timestamp.is_some()
    }

    pub fn is_valid(&self) -> bool {
        !self.is_stopped() && !self.is_expired()
    }

    /// Whether the session has idled for at least its timeout as of `now`.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        if self.expired {
            return true;
        }
        if self.timeout < 0 {
            tracing::trace!(
                "No timeout for session with id [{}]. Session is not considered expired.",
                self.id.unwrap_or_default()
            );
            return false;
        }
        now - self.last_access_time >= Duration::milliseconds(self.timeout)
    }

    /// Checks the session as of `now`.
    ///
    /// A stopped session always fails with `StoppedSession`. A session that
    /// has timed out is expired in place before failing with `ExpiredSession`.
    pub fn validate(&mut self, now: DateTime<Utc>) -> Result<()> {
        let id = self.id.unwrap_or_default();

        if self.is_stopped() {
            return Err(SecurityError::StoppedSession(id));
        }

        if self.is_timed_out(now) {
            self.expire(now);
            tracing::trace!(
                "Session with id [{}] has expired. Last access time: {}. Current time: {}. Session timeout is set to {} seconds",
                id,
                self.last_access_time,
                now,
                self.timeout / 1000
            );
            return Err(SecurityError::ExpiredSession(id));
        }

        Ok(())
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.as_ref().and_then(|attrs| attrs.get(key))
    }

    pub fn attribute_keys(&self) -> Vec<String> {
        self.attributes
            .as_ref()
            .map(|attrs| attrs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Stores `value` under `key`; `None` removes the key.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: Option<AttributeValue>) {
        let key = key.into();
        match value {
            Some(value) => {
                self.attributes
                    .get_or_insert_with(HashMap::new)
                    .insert(key, value);
            }
            None => {
                self.remove_attribute(&key);
            }
        }
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<AttributeValue> {
        self.attributes.as_mut().and_then(|attrs| attrs.remove(key))
    }
}

/// A read-only view of a session handed to listeners.
#[derive(Debug, Clone)]
pub struct SessionView {
    record: SessionRecord,
}

impl SessionView {
    pub fn id(&self) -> Option<SessionId> {
        self.record.id()
    }

    pub fn start_timestamp(&self) -> DateTime<Utc> {
        self.record.start_timestamp()
    }

    pub fn stop_timestamp(&self) -> Option<DateTime<Utc>> {
        self.record.stop_timestamp()
    }

    pub fn last_access_time(&self) -> DateTime<Utc> {
        self.record.last_access_time()
    }

    pub fn timeout(&self) -> i64 {
        self.record.timeout()
    }

    pub fn is_expired(&self) -> bool {
        self.record.is_expired()
    }

    pub fn host(&self) -> Option<&str> {
        self.record.host()
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.record.attribute(key)
    }

    pub fn attribute_keys(&self) -> Vec<String> {
        self.record.attribute_keys()
    }
}

impl From<&SessionRecord> for SessionView {
    fn from(record: &SessionRecord) -> Self {
        Self {
            record: record.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(now: DateTime<Utc>, timeout: i64) -> SessionRecord {
        let mut record = SessionRecord::new(now);
        record.set_id(SessionId::new_v4());
        record.set_timeout(timeout);
        record
    }

    #[test]
    fn expires_once_idle_time_reaches_timeout() {
        let start = Utc::now();
        let mut record = record_at(start, 1000);

        assert!(record.validate(start + Duration::milliseconds(999)).is_ok());

        let err = record
            .validate(start + Duration::milliseconds(1000))
            .unwrap_err();
        assert!(matches!(err, SecurityError::ExpiredSession(_)));
        assert!(record.is_expired());
        assert!(record.is_stopped());
    }

    #[test]
    fn negative_timeout_never_expires() {
        let start = Utc::now();
        let mut record = record_at(start, -1);

        assert!(record.validate(start + Duration::days(3650)).is_ok());
        assert!(!record.is_expired());
    }

    #[test]
    fn stop_wins_over_a_live_timeout_window() {
        let start = Utc::now();
        let mut record = record_at(start, 60_000);
        record.stop(start);

        for _ in 0..3 {
            let err = record.validate(start).unwrap_err();
            assert!(matches!(err, SecurityError::StoppedSession(_)));
        }
    }

    #[test]
    fn expire_is_idempotent() {
        let start = Utc::now();
        let mut record = record_at(start, 1000);

        record.expire(start + Duration::seconds(5));
        let stopped_at = record.stop_timestamp();

        record.expire(start + Duration::seconds(10));
        assert!(record.is_expired());
        assert_eq!(record.stop_timestamp(), stopped_at);
    }

    #[test]
    fn touch_resets_idle_window() {
        let start = Utc::now();
        let mut record = record_at(start, 1000);

        record.touch(start + Duration::milliseconds(800));
        assert!(record.validate(start + Duration::milliseconds(1500)).is_ok());
    }

    #[test]
    fn absent_attributes_read_as_empty() {
        let mut record = record_at(Utc::now(), 1000);

        assert!(record.attribute("role").is_none());
        assert!(record.attribute_keys().is_empty());
        assert!(record.remove_attribute("role").is_none());

        record.set_attribute("role", Some("admin".into()));
        assert_eq!(record.attribute("role").and_then(|v| v.as_str()), Some("admin"));

        record.set_attribute("role", None);
        assert!(record.attribute("role").is_none());
    }

    #[test]
    fn view_exposes_record_state() {
        let mut record = SessionRecord::with_host(Utc::now(), Some("10.0.0.1".into()));
        record.set_attribute("role", Some("admin".into()));

        let view = SessionView::from(&record);
        assert_eq!(view.host(), Some("10.0.0.1"));
        assert_eq!(view.attribute_keys(), vec!["role".to_string()]);
    }
}
