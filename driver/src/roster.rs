//! Roster subscriptions with a direct-fetch fallback.

use std::sync::Arc;

use gym_core::network::ApiRequest;
use gym_core::realtime::{ConnectionState, Roster, RosterChannel, Snapshot};
use gym_core::{GymResult, SessionManager};
use serde_json::Value;
use tokio::sync::watch;

use crate::models::User;

const USERS_PATH: &str = "/users";

/// How a roster refresh was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPath {
    /// Snapshot requested over the open channel; it arrives asynchronously.
    Live,
    /// Channel was not open; the roster was fetched and applied directly.
    Fetched,
}

/// A live roster plus the session needed to fetch it when the channel is down.
pub struct RosterFeed {
    roster: Roster,
    channel: RosterChannel,
    session: Arc<SessionManager>,
}

impl RosterFeed {
    pub(crate) fn new(roster: Roster, channel: RosterChannel, session: Arc<SessionManager>) -> Self {
        Self {
            roster,
            channel,
            session,
        }
    }

    pub fn roster(&self) -> Roster {
        self.roster
    }

    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.channel.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.channel.subscribe()
    }

    /// Current snapshot decoded as users. Entries that do not decode are skipped.
    pub fn users(&self) -> Vec<User> {
        self.snapshot()
            .iter()
            .filter_map(|entry| match serde_json::from_value(entry.clone()) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::debug!(roster = %self.roster, error = %e, "Skipping undecodable roster entry");
                    None
                }
            })
            .collect()
    }

    /// Bring the roster up to date after a mutation.
    ///
    /// Uses the channel when it is open, otherwise fetches the list once so
    /// the view does not stay stale while the channel reconnects.
    pub async fn refresh(&self) -> GymResult<RefreshPath> {
        if self.channel.request_refresh().await {
            return Ok(RefreshPath::Live);
        }

        tracing::info!(
            roster = %self.roster,
            state = ?self.channel.state(),
            "Roster channel unavailable, fetching directly"
        );
        let entries = self.fetch().await?;
        self.channel.replace_snapshot(entries);
        Ok(RefreshPath::Fetched)
    }

    pub async fn dispose(mut self) {
        self.channel.dispose().await;
    }

    async fn fetch(&self) -> GymResult<Vec<Value>> {
        let response = self
            .session
            .execute(ApiRequest::get(USERS_PATH))
            .await?
            .error_for_status()?;
        let all: Vec<Value> = response.json()?;

        Ok(all
            .into_iter()
            .filter(|entry| belongs_to(self.roster, entry))
            .collect())
    }
}

/// Same selection the server applies when it builds a snapshot.
fn belongs_to(roster: Roster, entry: &Value) -> bool {
    let role = entry
        .get("role")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase);

    match (roster, role.as_deref()) {
        (Roster::Trainers, Some(role)) => role == "trainer",
        (Roster::Users, Some(role)) => role != "admin" && role != "trainer",
        (_, None) => false,
    }
}
