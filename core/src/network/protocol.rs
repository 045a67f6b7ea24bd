//! Wire formats exchanged with the backend.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{GymError, GymResult};
use crate::session::Role;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const ME_PATH: &str = "/auth/me";

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Role names are matched case-insensitively; an unknown one leaves the
/// session without a role instead of failing the login.
fn lenient_role<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|raw| match raw.parse::<Role>() {
        Ok(role) => Some(role),
        Err(_) => {
            tracing::warn!(role = %raw, "Ignoring unknown role in login response");
            None
        }
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginRequest<'a> {
    pub identifier: &'a str,
    pub secret: &'a str,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, deserialize_with = "lenient_role")]
    pub role: Option<Role>,
    #[serde(default)]
    pub is_superuser: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshRequest<'a> {
    pub token: &'a str,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Client → server roster message: `{"type": "<topic>", ...filter}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterRequest<'a> {
    #[serde(rename = "type")]
    pub topic: &'a str,
    #[serde(flatten)]
    pub filter: &'a Map<String, Value>,
}

impl RosterRequest<'_> {
    pub fn encode(&self) -> GymResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server → client roster message: `{"type": "<topic>", "data": [...]}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RosterFrame {
    #[serde(rename = "type")]
    pub topic: String,
    #[serde(default)]
    pub data: Option<Vec<Value>>,
}

impl RosterFrame {
    pub fn decode(raw: &str) -> GymResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| GymError::Protocol(format!("Malformed roster frame: {e}")))
    }

    /// Snapshot entries when this frame is a snapshot for `topic`.
    pub fn into_snapshot_for(self, topic: &str) -> Option<Vec<Value>> {
        if self.topic == topic { self.data } else { None }
    }
}
