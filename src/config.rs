use std::env;
use std::time::Duration;
use anyhow::{Context, Result};
use zeroize::{Zeroize, Zeroizing};

use crate::models::session::DEFAULT_GLOBAL_SESSION_TIMEOUT;

/// The default interval between orphan-session sweeps (1 hour).
pub const DEFAULT_SESSION_VALIDATION_INTERVAL: Duration = Duration::from_secs(3600);

/// When session mutations reach the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Every mutation is written through to the store.
    #[default]
    Immediate,
    /// Mutations are buffered and written on `SessionManager::flush`.
    Deferred,
}

/// The session and identity configuration.
#[derive(Clone)]
pub struct SecurityConfig {
    /// Idle timeout applied to new sessions, in milliseconds. Negative disables expiry.
    pub global_session_timeout: i64,
    /// How often the background sweep validates all active sessions.
    pub session_validation_interval: Duration,
    /// Whether the background sweep runs at all.
    pub session_validation_scheduler_enabled: bool,
    /// Whether stopped and expired sessions are removed from the store.
    pub delete_invalid_sessions: bool,
    /// Whether subject state is stored in sessions by default.
    pub session_storage_enabled: bool,
    /// Write-through or deferred session updates.
    pub update_mode: UpdateMode,
    /// The remember-me cipher key. `None` generates a process-local key.
    pub cipher_key: Option<Zeroizing<Vec<u8>>>,
    /// The URL of the Redis server backing the session store, if any.
    pub redis_url: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            global_session_timeout: DEFAULT_GLOBAL_SESSION_TIMEOUT,
            session_validation_interval: DEFAULT_SESSION_VALIDATION_INTERVAL,
            session_validation_scheduler_enabled: true,
            delete_invalid_sessions: true,
            session_storage_enabled: true,
            update_mode: UpdateMode::Immediate,
            cipher_key: None,
            redis_url: None,
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{} must be a boolean, got {:?}", name, value),
    }
}

fn parse_update_mode(value: &str) -> Result<UpdateMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "immediate" => Ok(UpdateMode::Immediate),
        "deferred" => Ok(UpdateMode::Deferred),
        _ => anyhow::bail!("SESSION_UPDATE_MODE must be 'immediate' or 'deferred', got {:?}", value),
    }
}

/// Decodes a hex-encoded 32-byte cipher key, zeroizing the hex input.
pub fn parse_cipher_key_hex(mut key_hex: String) -> Result<Zeroizing<Vec<u8>>> {
    let decoded = hex::decode(key_hex.trim());
    key_hex.zeroize();

    let key_bytes = decoded.context("REMEMBER_ME_CIPHER_KEY must be valid hexadecimal")?;
    if key_bytes.len() != crate::crypto::aes::KEY_SIZE {
        anyhow::bail!("REMEMBER_ME_CIPHER_KEY must be exactly 32 bytes (64 hex characters)");
    }
    Ok(Zeroizing::new(key_bytes))
}

impl SecurityConfig {
    /// Creates a new `SecurityConfig` from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let global_session_timeout = match env::var("SESSION_TIMEOUT_MS") {
            Ok(v) => v.parse().context("Invalid SESSION_TIMEOUT_MS")?,
            Err(_) => defaults.global_session_timeout,
        };

        let session_validation_interval = match env::var("SESSION_VALIDATION_INTERVAL_SECS") {
            Ok(v) => Duration::from_secs(
                v.parse()
                    .context("Invalid SESSION_VALIDATION_INTERVAL_SECS")?,
            ),
            Err(_) => defaults.session_validation_interval,
        };
        if session_validation_interval.is_zero() {
            anyhow::bail!("SESSION_VALIDATION_INTERVAL_SECS must be greater than zero");
        }

        let session_validation_scheduler_enabled = match env::var("SESSION_VALIDATION_ENABLED") {
            Ok(v) => parse_bool("SESSION_VALIDATION_ENABLED", &v)?,
            Err(_) => defaults.session_validation_scheduler_enabled,
        };

        let delete_invalid_sessions = match env::var("DELETE_INVALID_SESSIONS") {
            Ok(v) => parse_bool("DELETE_INVALID_SESSIONS", &v)?,
            Err(_) => defaults.delete_invalid_sessions,
        };

        let session_storage_enabled = match env::var("SESSION_STORAGE_ENABLED") {
            Ok(v) => parse_bool("SESSION_STORAGE_ENABLED", &v)?,
            Err(_) => defaults.session_storage_enabled,
        };

        let update_mode = match env::var("SESSION_UPDATE_MODE") {
            Ok(v) => parse_update_mode(&v)?,
            Err(_) => defaults.update_mode,
        };

        let cipher_key = match env::var("REMEMBER_ME_CIPHER_KEY") {
            Ok(v) => Some(parse_cipher_key_hex(v)?),
            Err(_) => {
                tracing::warn!(
                    "⚠️  REMEMBER_ME_CIPHER_KEY not set: remember-me data will use a process-local key"
                );
                None
            }
        };

        Ok(Self {
            global_session_timeout,
            session_validation_interval,
            session_validation_scheduler_enabled,
            delete_invalid_sessions,
            session_storage_enabled,
            update_mode,
            cipher_key,
            redis_url: env::var("REDIS_URL").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SecurityConfig::default();
        assert_eq!(config.global_session_timeout, 30 * 60 * 1000);
        assert_eq!(config.session_validation_interval, Duration::from_secs(3600));
        assert!(config.session_validation_scheduler_enabled);
        assert!(config.delete_invalid_sessions);
        assert!(config.session_storage_enabled);
        assert_eq!(config.update_mode, UpdateMode::Immediate);
        assert!(config.cipher_key.is_none());
    }

    #[test]
    fn cipher_key_must_be_32_bytes_of_hex() {
        let key = parse_cipher_key_hex("ab".repeat(32)).unwrap();
        assert_eq!(key.len(), 32);

        assert!(parse_cipher_key_hex("abcd".to_string()).is_err());
        assert!(parse_cipher_key_hex("zz".repeat(32)).is_err());
    }

    #[test]
    fn booleans_and_modes_parse_leniently() {
        assert!(parse_bool("X", "Yes").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
        assert_eq!(parse_update_mode("Deferred").unwrap(), UpdateMode::Deferred);
    }
}
