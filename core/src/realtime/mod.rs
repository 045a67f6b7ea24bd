//! Live roster subscriptions over WebSocket.

mod channel;
mod transport;

pub use channel::{ChannelConfig, ConnectionState, RosterChannel, Snapshot};
pub use transport::{RosterConnector, RosterTransport, WsConnector};

use std::fmt;
use std::time::Duration;

/// Server-maintained lists that can be watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Roster {
    Trainers,
    Users,
}

impl Roster {
    pub fn topic(&self) -> &'static str {
        match self {
            Roster::Trainers => "trainers",
            Roster::Users => "users",
        }
    }

    /// Endpoint path relative to the WebSocket base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Roster::Trainers => "/users/ws/trainers",
            Roster::Users => "/users/ws/",
        }
    }

    pub fn url(&self, ws_base: &str) -> String {
        format!("{}{}", ws_base.trim_end_matches('/'), self.path())
    }

    pub fn channel_config(&self, ws_base: &str, retry_delay: Duration) -> ChannelConfig {
        ChannelConfig::new(self.url(ws_base), self.topic(), retry_delay)
    }
}

impl fmt::Display for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

impl std::str::FromStr for Roster {
    type Err = crate::error::GymError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trainers" | "trainer" => Ok(Roster::Trainers),
            "users" | "user" => Ok(Roster::Users),
            other => Err(crate::error::GymError::Config(format!(
                "Unknown roster '{other}' (expected trainers or users)"
            ))),
        }
    }
}
