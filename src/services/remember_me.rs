use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

use crate::config::SecurityConfig;
use crate::crypto::aes::{self, AesCipherService};
use crate::crypto::cipher::CipherService;
use crate::error::{Result, SecurityError};
use crate::models::principal::PrincipalSet;
use crate::models::token::{AuthenticationInfo, AuthenticationToken};
use crate::serializer::{BincodePrincipalSerializer, PrincipalSerializer};
use crate::services::subject::{Subject, SubjectContext};

/// Where a remembered identity blob is kept between sessions.
#[async_trait]
pub trait RememberMeSink: Send + Sync {
    /// Stores `bytes`, replacing anything stored before.
    async fn put(&self, bytes: &[u8]) -> Result<()>;

    /// Returns the stored bytes, if any.
    async fn get(&self) -> Result<Option<Vec<u8>>>;

    /// Discards the stored bytes.
    async fn remove(&self) -> Result<()>;
}

/// A `RememberMeSink` holding the blob in memory.
#[derive(Clone, Default)]
pub struct MemoryRememberMeSink {
    blob: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryRememberMeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the stored blob.
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.blob
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl RememberMeSink for MemoryRememberMeSink {
    async fn put(&self, bytes: &[u8]) -> Result<()> {
        let mut blob = self.blob.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *blob = Some(bytes.to_vec());
        Ok(())
    }

    async fn get(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot())
    }

    async fn remove(&self) -> Result<()> {
        let mut blob = self.blob.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *blob = None;
        Ok(())
    }
}

/// Remembers identities across sessions.
///
/// Principals are serialized and then, when a cipher is configured,
/// encrypted before they reach the subject's sink. Recovery reverses the
/// pipeline; any recovery failure purges the stored blob and is returned
/// to the caller.
pub struct RememberMeManager {
    serializer: Arc<dyn PrincipalSerializer>,
    cipher: Option<Arc<dyn CipherService>>,
    encryption_key: Zeroizing<Vec<u8>>,
    decryption_key: Zeroizing<Vec<u8>>,
}

impl RememberMeManager {
    /// AES-256-GCM with a freshly generated, process-local key.
    ///
    /// Blobs written by one process cannot be read by another. Deployments
    /// with more than one node or restarts must configure a shared key.
    pub fn new() -> Self {
        let key = aes::generate_key();
        Self {
            serializer: Arc::new(BincodePrincipalSerializer),
            cipher: Some(Arc::new(AesCipherService)),
            encryption_key: Zeroizing::new(key.as_bytes().to_vec()),
            decryption_key: Zeroizing::new(key.as_bytes().to_vec()),
        }
    }

    /// Uses the configured cipher key, or a generated one if none is set.
    pub fn from_config(config: &SecurityConfig) -> Self {
        let mut manager = Self::new();
        if let Some(key) = &config.cipher_key {
            manager.set_cipher_key(key);
        }
        manager
    }

    pub fn serializer(&self) -> &Arc<dyn PrincipalSerializer> {
        &self.serializer
    }

    pub fn set_serializer(&mut self, serializer: Arc<dyn PrincipalSerializer>) {
        self.serializer = serializer;
    }

    pub fn cipher_service(&self) -> Option<&Arc<dyn CipherService>> {
        self.cipher.as_ref()
    }

    /// `None` disables encryption; blobs are then only serialized.
    pub fn set_cipher_service(&mut self, cipher: Option<Arc<dyn CipherService>>) {
        self.cipher = cipher;
    }

    pub fn encryption_cipher_key(&self) -> &[u8] {
        &self.encryption_key
    }

    pub fn set_encryption_cipher_key(&mut self, key: &[u8]) {
        self.encryption_key = Zeroizing::new(key.to_vec());
    }

    pub fn decryption_cipher_key(&self) -> &[u8] {
        &self.decryption_key
    }

    pub fn set_decryption_cipher_key(&mut self, key: &[u8]) {
        self.decryption_key = Zeroizing::new(key.to_vec());
    }

    /// Uses `key` for both encryption and decryption.
    pub fn set_cipher_key(&mut self, key: &[u8]) {
        self.set_encryption_cipher_key(key);
        self.set_decryption_cipher_key(key);
    }

    /// Sets a symmetric key given in hexadecimal.
    pub fn set_cipher_key_hex(&mut self, key_hex: &str) -> Result<()> {
        let key = Zeroizing::new(
            hex::decode(key_hex.trim())
                .map_err(|e| SecurityError::Encryption(format!("Invalid hex cipher key: {}", e)))?,
        );
        self.set_cipher_key(&key);
        Ok(())
    }

    /// Sets a symmetric key given in standard base64.
    pub fn set_cipher_key_base64(&mut self, key_base64: &str) -> Result<()> {
        let key = Zeroizing::new(
            general_purpose::STANDARD
                .decode(key_base64.trim())
                .map_err(|e| SecurityError::Encryption(format!("Invalid base64 cipher key: {}", e)))?,
        );
        self.set_cipher_key(&key);
        Ok(())
    }

    /// Serializes `principals`, then encrypts them if a cipher is configured.
    pub fn convert_principals_to_bytes(&self, principals: &PrincipalSet) -> Result<Vec<u8>> {
        let bytes = self.serializer.serialize(principals)?;
        match &self.cipher {
            Some(cipher) => cipher.encrypt(&bytes, &self.encryption_key),
            None => Ok(bytes),
        }
    }

    /// Decrypts `bytes` if a cipher is configured, then deserializes them.
    pub fn convert_bytes_to_principals(&self, bytes: &[u8]) -> Result<PrincipalSet> {
        match &self.cipher {
            Some(cipher) => {
                let plaintext = Zeroizing::new(cipher.decrypt(bytes, &self.decryption_key)?);
                self.serializer.deserialize(&plaintext)
            }
            None => self.serializer.deserialize(bytes),
        }
    }

    /// Forgets any prior identity, then remembers `info`'s principals if the token asked for it.
    pub async fn on_successful_login(
        &self,
        subject: &Subject,
        token: &AuthenticationToken,
        info: &AuthenticationInfo,
    ) -> Result<()> {
        let sink = subject.remember_me_sink();
        self.forget_identity(sink).await?;

        if !token.is_remember_me() {
            tracing::debug!(
                "AuthenticationToken did not indicate RememberMe is requested. RememberMe functionality will not be executed for corresponding account."
            );
            return Ok(());
        }

        let Some(sink) = sink else {
            tracing::debug!("Subject has no remember-me sink, identity will not be remembered");
            return Ok(());
        };

        let bytes = self.convert_principals_to_bytes(&info.principals)?;
        sink.put(&bytes).await?;
        tracing::debug!("🔐 Remembered identity for {:?}", info.principals.primary());
        Ok(())
    }

    pub async fn on_failed_login(
        &self,
        subject: &Subject,
        _token: &AuthenticationToken,
        _error: &SecurityError,
    ) -> Result<()> {
        self.forget_identity(subject.remember_me_sink()).await
    }

    pub async fn on_logout(&self, subject: &Subject) -> Result<()> {
        self.forget_identity(subject.remember_me_sink()).await
    }

    /// Recovers the remembered identity for `context`.
    ///
    /// Returns `Ok(None)` when nothing (or an empty blob) is stored. On any
    /// failure the stored blob is removed before the error is returned.
    pub async fn get_remembered_principals(
        &self,
        context: &SubjectContext,
    ) -> Result<Option<PrincipalSet>> {
        let Some(sink) = context.remember_me_sink() else {
            return Ok(None);
        };

        match self.recover(sink.as_ref()).await {
            Ok(principals) => Ok(principals),
            Err(e) => {
                tracing::warn!(
                    "⚠️ There was a failure while trying to retrieve remembered principals: {}. Forgetting the remembered identity.",
                    e
                );
                if let Err(purge) = sink.remove().await {
                    tracing::error!("❌ Failed to forget the remembered identity: {}", purge);
                }
                Err(e)
            }
        }
    }

    async fn recover(&self, sink: &dyn RememberMeSink) -> Result<Option<PrincipalSet>> {
        let bytes = match sink.get().await? {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Ok(None),
        };
        self.convert_bytes_to_principals(&bytes).map(Some)
    }

    async fn forget_identity(&self, sink: Option<&Arc<dyn RememberMeSink>>) -> Result<()> {
        if let Some(sink) = sink {
            sink.remove().await?;
            tracing::trace!("Forgot remembered identity");
        }
        Ok(())
    }
}

impl Default for RememberMeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session_manager::SessionManager;

    fn principals() -> PrincipalSet {
        let mut principals = PrincipalSet::from_principal("jsmith", "ldap");
        principals.add("42", "db");
        principals
    }

    fn subject_with(sink: &MemoryRememberMeSink) -> Subject {
        let manager = SessionManager::builder()
            .session_validation_scheduler_enabled(false)
            .build();
        Subject::new(manager).with_remember_me_sink(Some(Arc::new(sink.clone())))
    }

    fn context_with(sink: &MemoryRememberMeSink) -> SubjectContext {
        SubjectContext::new().with_remember_me_sink(Arc::new(sink.clone()))
    }

    fn token(remember_me: bool) -> AuthenticationToken {
        AuthenticationToken::new("jsmith", b"secret".to_vec()).remember_me(remember_me)
    }

    #[tokio::test]
    async fn remembers_only_when_requested() {
        let rm = RememberMeManager::new();
        let sink = MemoryRememberMeSink::new();
        sink.put(b"stale").await.unwrap();
        let info = AuthenticationInfo::new(principals());

        rm.on_successful_login(&subject_with(&sink), &token(false), &info)
            .await
            .unwrap();
        assert!(sink.snapshot().is_none());

        rm.on_successful_login(&subject_with(&sink), &token(true), &info)
            .await
            .unwrap();
        let recovered = rm.get_remembered_principals(&context_with(&sink)).await.unwrap();
        assert_eq!(recovered, Some(principals()));
    }

    #[tokio::test]
    async fn stored_blob_is_encrypted() {
        let rm = RememberMeManager::new();
        let plain = BincodePrincipalSerializer.serialize(&principals()).unwrap();

        let blob = rm.convert_principals_to_bytes(&principals()).unwrap();

        assert_ne!(blob, plain);
        assert_eq!(rm.convert_bytes_to_principals(&blob).unwrap(), principals());
    }

    #[tokio::test]
    async fn round_trips_without_a_cipher() {
        let mut rm = RememberMeManager::new();
        rm.set_cipher_service(None);
        let plain = BincodePrincipalSerializer.serialize(&principals()).unwrap();

        let blob = rm.convert_principals_to_bytes(&principals()).unwrap();

        assert_eq!(blob, plain);
        assert_eq!(rm.convert_bytes_to_principals(&blob).unwrap(), principals());
    }

    #[tokio::test]
    async fn failed_login_and_logout_forget() {
        let rm = RememberMeManager::new();
        let sink = MemoryRememberMeSink::new();
        let subject = subject_with(&sink);
        let info = AuthenticationInfo::new(principals());

        rm.on_successful_login(&subject, &token(true), &info).await.unwrap();
        let failure = SecurityError::Authentication("bad credentials".into());
        rm.on_failed_login(&subject, &token(true), &failure).await.unwrap();
        assert!(rm.get_remembered_principals(&context_with(&sink)).await.unwrap().is_none());

        rm.on_successful_login(&subject, &token(true), &info).await.unwrap();
        rm.on_logout(&subject).await.unwrap();
        assert!(rm.get_remembered_principals(&context_with(&sink)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rotated_key_purges_and_reports() {
        let writer = RememberMeManager::new();
        let reader = RememberMeManager::new();
        let sink = MemoryRememberMeSink::new();
        let info = AuthenticationInfo::new(principals());

        writer
            .on_successful_login(&subject_with(&sink), &token(true), &info)
            .await
            .unwrap();

        let err = reader
            .get_remembered_principals(&context_with(&sink))
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::Encryption(_)));
        assert!(sink.snapshot().is_none());
    }

    #[tokio::test]
    async fn forged_plaintext_blob_is_purged_and_reported() {
        let mut rm = RememberMeManager::new();
        rm.set_cipher_service(None);
        let sink = MemoryRememberMeSink::new();
        let mut forged = vec![0xFD];
        forged.extend_from_slice(&(1u64 << 40).to_le_bytes());
        sink.put(&forged).await.unwrap();

        let err = rm
            .get_remembered_principals(&context_with(&sink))
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::Serialization(_)));
        assert!(sink.snapshot().is_none());
    }

    #[tokio::test]
    async fn empty_blob_means_nothing_remembered() {
        let rm = RememberMeManager::new();
        let sink = MemoryRememberMeSink::new();
        sink.put(&[]).await.unwrap();

        assert!(rm.get_remembered_principals(&context_with(&sink)).await.unwrap().is_none());
    }

    #[test]
    fn hex_and_base64_keys_set_both_directions() {
        let mut rm = RememberMeManager::new();
        let key = [7u8; 32];

        rm.set_cipher_key_hex(&hex::encode(key)).unwrap();
        assert_eq!(rm.encryption_cipher_key(), &key);
        assert_eq!(rm.decryption_cipher_key(), &key);

        rm.set_cipher_key_base64(&general_purpose::STANDARD.encode([9u8; 32]))
            .unwrap();
        assert_eq!(rm.decryption_cipher_key(), &[9u8; 32]);

        assert!(rm.set_cipher_key_hex("not hex").is_err());
    }

    #[test]
    fn configured_keys_are_shared_between_managers() {
        let config = SecurityConfig {
            cipher_key: Some(Zeroizing::new(vec![3u8; 32])),
            ..SecurityConfig::default()
        };
        let writer = RememberMeManager::from_config(&config);
        let reader = RememberMeManager::from_config(&config);

        let blob = writer.convert_principals_to_bytes(&principals()).unwrap();
        assert_eq!(reader.convert_bytes_to_principals(&blob).unwrap(), principals());
    }
}
