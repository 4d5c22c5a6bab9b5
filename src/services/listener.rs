use crate::error::{Result, SecurityError};
use crate::models::principal::PrincipalSet;
use crate::models::session::SessionView;
use crate::models::token::{AuthenticationInfo, AuthenticationToken};

/// Receives session lifecycle notifications.
///
/// Listeners only ever see a read-only `SessionView`. A returned error is
/// logged by the manager and never interrupts the lifecycle transition.
pub trait SessionListener: Send + Sync {
    fn on_start(&self, _session: &SessionView) -> Result<()> {
        Ok(())
    }

    fn on_stop(&self, _session: &SessionView) -> Result<()> {
        Ok(())
    }

    fn on_expiration(&self, _session: &SessionView) -> Result<()> {
        Ok(())
    }
}

/// Receives login and logout notifications.
///
/// Errors are logged and never abort the login or logout in progress.
pub trait AuthenticationListener: Send + Sync {
    fn on_success(&self, _token: &AuthenticationToken, _info: &AuthenticationInfo) -> Result<()> {
        Ok(())
    }

    fn on_failure(&self, _token: &AuthenticationToken, _error: &SecurityError) -> Result<()> {
        Ok(())
    }

    fn on_logout(&self, _principals: Option<&PrincipalSet>) -> Result<()> {
        Ok(())
    }
}
