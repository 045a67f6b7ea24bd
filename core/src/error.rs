//! Error definitions for the GymDesk client

use thiserror::Error;

pub type GymResult<T> = Result<T, GymError>;

/// Errors surfaced by the client core.
///
/// Authorization failures that can be recovered with a token refresh never
/// reach callers; only the terminal [`GymError::SessionTerminated`] does.
///
/// # Example
/// ```rust
/// use gym_core::GymError;
///
/// fn example() -> gym_core::GymResult<()> {
///     Err(GymError::Authentication("Invalid phone number or password".into()))
/// }
///
/// match example() {
///     Ok(_) => println!("Logged in"),
///     Err(e) => println!("Login failed: {e}"),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GymError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Session terminated (status {status})")]
    SessionTerminated { status: u16, detail: Option<String> },

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    #[error("Request failed with status {status}: {message}")]
    Request { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl GymError {
    /// Get the inner message without the type prefix.
    pub fn message(&self) -> String {
        match self {
            GymError::Authentication(msg)
            | GymError::Refresh(msg)
            | GymError::Network(msg)
            | GymError::Transport(msg)
            | GymError::Protocol(msg)
            | GymError::Serialization(msg)
            | GymError::Storage(msg)
            | GymError::Config(msg)
            | GymError::Io(msg) => msg.clone(),
            GymError::Request { message, .. } => message.clone(),
            GymError::SessionTerminated { detail, status } => detail
                .clone()
                .unwrap_or_else(|| format!("unauthorized ({status})")),
        }
    }

    /// Get a short error kind name
    pub fn kind(&self) -> &'static str {
        match self {
            GymError::Authentication(_) => "authentication_error",
            GymError::SessionTerminated { .. } => "session_terminated",
            GymError::Refresh(_) => "refresh_error",
            GymError::Request { .. } => "request_error",
            GymError::Network(_) => "network_error",
            GymError::Transport(_) => "transport_error",
            GymError::Protocol(_) => "protocol_error",
            GymError::Serialization(_) => "serialization_error",
            GymError::Storage(_) => "storage_error",
            GymError::Config(_) => "config_error",
            GymError::Io(_) => "io_error",
        }
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GymError::SessionTerminated { status, .. } | GymError::Request { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Whether the caller has to send the user back to the login screen.
    pub fn requires_login(&self) -> bool {
        matches!(self, GymError::SessionTerminated { .. })
    }
}

impl From<std::io::Error> for GymError {
    fn from(err: std::io::Error) -> Self {
        GymError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GymError {
    fn from(err: serde_json::Error) -> Self {
        GymError::Serialization(err.to_string())
    }
}
