use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;

use crate::config::SecurityConfig;
use crate::error::{Result, SecurityError};
use crate::models::session::{SessionId, SessionRecord};
use crate::repositories::session::{
    require_id, SessionIdGenerator, SessionStore, UuidSessionIdGenerator,
};

/// Prefix of every session key.
pub const SESSION_KEY_PREFIX: &str = "session:";
/// Extra lifetime given to a key beyond the session's idle timeout, so the
/// manager observes the expiry before Redis evicts the record.
const EXPIRY_GRACE_SECS: u64 = 60;
/// Keys fetched per `SCAN` round trip.
const SCAN_BATCH_SIZE: usize = 100;

/// A `SessionStore` keeping JSON-encoded records in Redis.
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: ConnectionManager,
    id_generator: Arc<dyn SessionIdGenerator>,
}

impl RedisSessionStore {
    /// Creates a store over an existing connection manager.
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            id_generator: Arc::new(UuidSessionIdGenerator),
        }
    }

    /// Opens a pooled connection to `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        tracing::info!("✅ Redis Connection Manager initialized for sessions");
        Ok(Self::new(redis))
    }

    /// Connects to the configured Redis server, if there is one.
    pub async fn from_config(config: &SecurityConfig) -> Result<Option<Self>> {
        match &config.redis_url {
            Some(url) => Self::connect(url).await.map(Some),
            None => Ok(None),
        }
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn SessionIdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    fn key(id: SessionId) -> String {
        format!("{}{}", SESSION_KEY_PREFIX, id)
    }

    /// Key lifetime for `record`; `None` for sessions that never expire.
    fn ttl_secs(record: &SessionRecord) -> Option<u64> {
        if record.timeout() < 0 {
            return None;
        }
        let timeout_secs = (record.timeout() as u64).div_ceil(1000);
        Some(timeout_secs + EXPIRY_GRACE_SECS)
    }

    async fn write(&self, id: SessionId, record: &SessionRecord) -> Result<()> {
        let session_json = sonic_rs::to_string(record)
            .map_err(|e| SecurityError::Serialization(format!("Session serialization failed: {}", e)))?;

        let mut redis = self.redis.clone();
        match Self::ttl_secs(record) {
            Some(seconds) => {
                let _: () = redis
                    .set_ex(Self::key(id), &session_json, seconds)
                    .await
                    .map_err(|e| {
                        tracing::error!("❌ Redis set_ex failed: {}", e);
                        SecurityError::Redis(e)
                    })?;
            }
            None => {
                let _: () = redis.set(Self::key(id), &session_json).await?;
            }
        }
        Ok(())
    }

    fn parse(key: &str, session_json: &str) -> Option<SessionRecord> {
        match sonic_rs::from_str::<SessionRecord>(session_json) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("❌ Invalid session JSON under {}: {}", key, e);
                None
            }
        }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, record: &mut SessionRecord) -> Result<SessionId> {
        let id = self.id_generator.generate_id();
        record.set_id(id);
        self.write(id, record).await?;
        tracing::debug!("✅ Session saved to Redis: {}", Self::key(id));
        Ok(id)
    }

    async fn read_session(&self, id: SessionId) -> Result<Option<SessionRecord>> {
        let key = Self::key(id);
        let mut redis = self.redis.clone();
        let session_json: Option<String> = redis.get(&key).await?;
        Ok(session_json.and_then(|json| Self::parse(&key, &json)))
    }

    async fn update(&self, record: &SessionRecord) -> Result<()> {
        let id = require_id(record)?;
        self.write(id, record).await
    }

    async fn delete(&self, record: &SessionRecord) -> Result<()> {
        let id = require_id(record)?;
        let mut redis = self.redis.clone();
        let _: () = redis.del(Self::key(id)).await?;
        tracing::debug!("✅ Session deleted from Redis: {}", Self::key(id));
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut cursor = 0u64;
        let mut active = Vec::new();
        let pattern = format!("{}*", SESSION_KEY_PREFIX);

        loop {
            let mut redis = self.redis.clone();
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE)
                .query_async(&mut redis)
                .await?;

            for key in keys {
                let session_json: Option<String> = redis.get(&key).await?;
                if let Some(record) = session_json.and_then(|json| Self::parse(&key, &json)) {
                    if record.is_valid() {
                        active.push(record);
                    }
                }
            }

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        Ok(active)
    }
}
