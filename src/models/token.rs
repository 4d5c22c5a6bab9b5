use std::fmt;
use zeroize::Zeroizing;

use crate::models::principal::PrincipalSet;

/// A login attempt, as submitted by a client.
///
/// The credentials are only ever read by the external `Authenticator`.
#[derive(Clone)]
pub struct AuthenticationToken {
    /// The submitted account identifier, e.g. a username.
    pub principal: String,
    /// The submitted credentials, zeroized on drop.
    pub credentials: Zeroizing<Vec<u8>>,
    /// Whether the client asked to be remembered across sessions.
    pub remember_me: bool,
    /// The host the attempt originated from.
    pub host: Option<String>,
}

impl AuthenticationToken {
    pub fn new(principal: impl Into<String>, credentials: impl Into<Vec<u8>>) -> Self {
        Self {
            principal: principal.into(),
            credentials: Zeroizing::new(credentials.into()),
            remember_me: false,
            host: None,
        }
    }

    pub fn remember_me(mut self, remember_me: bool) -> Self {
        self.remember_me = remember_me;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn is_remember_me(&self) -> bool {
        self.remember_me
    }
}

impl fmt::Debug for AuthenticationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationToken")
            .field("principal", &self.principal)
            .field("credentials", &"<redacted>")
            .field("remember_me", &self.remember_me)
            .field("host", &self.host)
            .finish()
    }
}

/// The account data produced by a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationInfo {
    pub principals: PrincipalSet,
}

impl AuthenticationInfo {
    pub fn new(principals: PrincipalSet) -> Self {
        Self { principals }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_credentials() {
        let token = AuthenticationToken::new("jsmith", b"hunter22".to_vec()).remember_me(true);
        let printed = format!("{:?}", token);

        assert!(printed.contains("jsmith"));
        assert!(!printed.contains("hunter22"));
        assert!(token.is_remember_me());
    }
}
