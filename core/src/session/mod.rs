//! Client-side authentication state.
//!
//! [`Session`] is the value held by the [`SessionManager`]; nothing else
//! mutates it. Persistence goes through a [`CredentialStore`].

mod manager;
mod store;

pub use manager::SessionManager;
pub use store::{CredentialStore, FileStore, MemoryStore};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GymError;
use crate::network::protocol::LoginResponse;

/// Route the user is sent to when the session ends.
pub const LOGIN_ROUTE: &str = "/login";

pub(crate) const KEY_ACCESS_TOKEN: &str = "access_token";
pub(crate) const KEY_REFRESH_TOKEN: &str = "refresh_token";
pub(crate) const KEY_ROLE: &str = "user_role";
pub(crate) const KEY_TOKEN_TYPE: &str = "token_type";
pub(crate) const KEY_SUPERUSER: &str = "is_superuser";

pub(crate) const ALL_KEYS: [&str; 5] = [
    KEY_ACCESS_TOKEN,
    KEY_REFRESH_TOKEN,
    KEY_ROLE,
    KEY_TOKEN_TYPE,
    KEY_SUPERUSER,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[serde(alias = "super_admin", alias = "superadmin")]
    SuperAdmin,
    Admin,
    Trainer,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super-admin",
            Role::Admin => "admin",
            Role::Trainer => "trainer",
            Role::Client => "client",
        }
    }

    /// Screen a freshly authenticated user lands on.
    pub fn landing_route(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "/gyms",
            Role::Admin => "/dashboard",
            Role::Trainer => "/trainer-dashboard",
            Role::Client => "/attendance",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = GymError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "super-admin" | "super_admin" | "superadmin" => Ok(Role::SuperAdmin),
            "admin" => Ok(Role::Admin),
            "trainer" => Ok(Role::Trainer),
            "client" => Ok(Role::Client),
            other => Err(GymError::Protocol(format!("Unknown role: {other}"))),
        }
    }
}

/// Current authentication state.
///
/// An access token is required for any role to be present; the
/// constructors uphold that, so there is no way to build a session with a
/// role and no token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    access_token: Option<String>,
    refresh_token: Option<String>,
    role: Option<Role>,
    token_type: String,
    is_superuser: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            role: None,
            token_type: "bearer".to_string(),
            is_superuser: false,
        }
    }
}

impl Session {
    pub(crate) fn from_login(response: LoginResponse) -> Self {
        Self {
            access_token: Some(response.access_token),
            refresh_token: response.refresh_token,
            role: response.role,
            token_type: response.token_type,
            is_superuser: response.is_superuser,
        }
    }

    /// Rebuild a session from persisted parts, dropping anything that would
    /// break the token/role invariant.
    pub(crate) fn from_parts(
        access_token: Option<String>,
        refresh_token: Option<String>,
        role: Option<Role>,
        token_type: Option<String>,
        is_superuser: bool,
    ) -> Self {
        let authenticated = access_token.is_some();
        Self {
            access_token,
            refresh_token: refresh_token.filter(|_| authenticated),
            role: role.filter(|_| authenticated),
            token_type: token_type.unwrap_or_else(|| "bearer".to_string()),
            is_superuser: is_superuser && authenticated,
        }
    }

    pub(crate) fn replace_access_token(&mut self, token: String) {
        self.access_token = Some(token);
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn is_superuser(&self) -> bool {
        self.is_superuser
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> Option<String> {
        self.access_token
            .as_ref()
            .map(|token| format!("Bearer {token}"))
    }

    /// Protected-route check: the session carries one of `allowed`.
    /// An empty list admits any authenticated role.
    pub fn allows(&self, allowed: &[Role]) -> bool {
        match self.role {
            Some(role) => allowed.is_empty() || allowed.contains(&role),
            None => false,
        }
    }

    /// Where an authenticated user should be sent, or the login screen.
    pub fn home_route(&self) -> &'static str {
        self.role.map(|r| r.landing_route()).unwrap_or(LOGIN_ROUTE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The refresh endpoint rejected the refresh token or could not be reached.
    RefreshFailed,
    /// A call that was already retried came back unauthorized again.
    RetryUnauthorized,
    /// Unauthorized with no refresh token to recover with.
    NoRefreshToken,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationReason::RefreshFailed => "token refresh failed",
            TerminationReason::RetryUnauthorized => "retried request still unauthorized",
            TerminationReason::NoRefreshToken => "unauthorized without a refresh token",
        };
        f.write_str(text)
    }
}

/// Lifecycle notifications broadcast by the [`SessionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { role: Option<Role> },
    Refreshed,
    LoggedOut,
    /// Credentials were cleared; the user has to go back to `redirect_to`.
    Terminated {
        reason: TerminationReason,
        redirect_to: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticated(role: Role) -> Session {
        Session::from_parts(Some("tok".into()), Some("ref".into()), Some(role), None, false)
    }

    #[test]
    fn test_role_parsing_and_serde() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("super_admin".parse::<Role>().unwrap(), Role::SuperAdmin);
        assert!("owner".parse::<Role>().is_err());

        let role: Role = serde_json::from_str(r#""super-admin""#).unwrap();
        assert_eq!(role, Role::SuperAdmin);
        assert_eq!(serde_json::to_string(&Role::Trainer).unwrap(), r#""trainer""#);
    }

    #[test]
    fn test_landing_routes() {
        assert_eq!(Role::Admin.landing_route(), "/dashboard");
        assert_eq!(Role::Client.landing_route(), "/attendance");
        assert_eq!(Role::Trainer.landing_route(), "/trainer-dashboard");
        assert_eq!(Session::default().home_route(), LOGIN_ROUTE);
    }

    #[test]
    fn test_role_requires_token() {
        let session = Session::from_parts(None, Some("ref".into()), Some(Role::Admin), None, true);
        assert!(!session.is_authenticated());
        assert_eq!(session.role(), None);
        assert_eq!(session.refresh_token(), None);
        assert!(!session.is_superuser());
    }

    #[test]
    fn test_authorization_header() {
        let session = authenticated(Role::Admin);
        assert_eq!(session.authorization().as_deref(), Some("Bearer tok"));
        assert_eq!(Session::default().authorization(), None);
    }

    #[test]
    fn test_allows() {
        let session = authenticated(Role::Trainer);
        assert!(session.allows(&[Role::Trainer, Role::Admin]));
        assert!(!session.allows(&[Role::Admin]));
        assert!(session.allows(&[]));
        assert!(!Session::default().allows(&[]));
    }
}
