use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every REST path is appended to.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Roster channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// WebSocket base URL. Derived from the API base when unset.
    pub ws_url: Option<String>,
    /// Fixed delay before reconnecting a closed channel.
    pub reconnect_delay_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            reconnect_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// File backing the persisted credentials.
    pub credentials_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from(".gymdesk/credentials.json"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
    pub storage: StorageConfig,
}

impl ClientConfig {
    /// Load config from TOML file, with environment variable overrides.
    /// Falls back to defaults if file is not found. GYMDESK_CONFIG env var overrides the path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        ConfigLoader::new().load(path)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml(source: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.realtime.reconnect_delay_ms)
    }

    /// WebSocket base URL, swapping `http`/`https` for `ws`/`wss` when not configured.
    pub fn ws_base_url(&self) -> String {
        if let Some(url) = &self.realtime.ws_url {
            return url.trim_end_matches('/').to_string();
        }

        let base = self.api.base_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        }
    }
}

/// Resolves configuration from file, CLI args, and environment variables.
struct ConfigLoader {
    args: Vec<String>,
}

impl ConfigLoader {
    fn new() -> Self {
        Self {
            args: env::args().collect(),
        }
    }

    fn load<P: AsRef<Path>>(&self, default_path: P) -> anyhow::Result<ClientConfig> {
        let mut cfg_path = self.resolve_config_path(default_path);

        if let Ok(env_path) = env::var("GYMDESK_CONFIG") {
            cfg_path = PathBuf::from(env_path);
        }

        let mut cfg = match fs::read_to_string(&cfg_path) {
            Ok(s) => ClientConfig::from_toml(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClientConfig::default(),
            Err(e) => return Err(e.into()),
        };

        apply_overrides(&mut cfg, |key| env::var(key).ok());
        Ok(cfg)
    }

    fn resolve_config_path<P: AsRef<Path>>(&self, default_path: P) -> PathBuf {
        find_config_arg(&self.args).unwrap_or_else(|| default_path.as_ref().to_path_buf())
    }
}

/// Find --config or -c flag in arguments.
fn find_config_arg(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter().peekable();
    while let Some(a) = iter.next() {
        if a.starts_with("--config=") || a.starts_with("-c=") {
            if let Some((_, val)) = a.split_once('=') {
                return Some(PathBuf::from(val));
            }
        } else if (a == "--config" || a == "-c")
            && let Some(next) = iter.peek()
        {
            return Some(PathBuf::from((*next).clone()));
        }
    }
    None
}

/// Apply GYMDESK_* overrides through `lookup`.
fn apply_overrides(cfg: &mut ClientConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("GYMDESK_API_URL") {
        cfg.api.base_url = v;
    }

    if let Some(v) = lookup("GYMDESK_WS_URL") {
        cfg.realtime.ws_url = Some(v);
    }

    if let Some(v) = lookup("GYMDESK_RECONNECT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.realtime.reconnect_delay_ms = ms;
    }

    if let Some(v) = lookup("GYMDESK_CREDENTIALS") {
        cfg.storage.credentials_path = PathBuf::from(v);
    }
}
