use crate::error::{DashboardError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Entity column of the bundled market dataset
pub const DEFAULT_ENTITY_COLUMN: &str = "symbol";

/// Top level configuration, read from a TOML file
///
/// Every section has defaults, so an empty file (or no file at all) yields
/// the stock dashboard: bundled CSV at `data/crypto_markets.csv`, one hour
/// cache, a single admin account and the reset-after-three retry policy.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct DashboardConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    /// Bundled dataset on local disk
    pub local_path: String,

    /// HTTPS URL serving the same CSV, used only when `local_path` is absent
    pub remote_url: Option<String>,

    /// Upper bound for the remote fetch
    pub fetch_timeout_secs: u64,

    /// Columns read as timestamps even when their cells are integer epochs
    pub temporal_columns: Vec<String>,

    /// Column naming each asset: the metric card filter, the entity options,
    /// ranking labels and the key of per-asset questions all read it
    pub entity_column: String,

    pub cache: CachePolicy,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            local_path: "data/crypto_markets.csv".to_string(),
            remote_url: None,
            fetch_timeout_secs: 10,
            temporal_columns: vec!["last_updated".to_string()],
            entity_column: DEFAULT_ENTITY_COLUMN.to_string(),
            cache: CachePolicy::default(),
        }
    }
}

impl DataConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// How long a loaded dataset stays memoized
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CachePolicy {
    /// Keep the first successful load for the lifetime of the process
    Forever,
    /// Reload once the cached copy is older than `ttl_secs`
    Ttl { ttl_secs: u64 },
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Ttl { ttl_secs: 60 * 60 }
    }
}

impl CachePolicy {
    /// Returns the maximum age, or `None` when entries never expire
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            CachePolicy::Forever => None,
            CachePolicy::Ttl { ttl_secs } => Some(Duration::from_secs(*ttl_secs)),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AuthConfig {
    pub credentials: Vec<Credential>,
    pub max_attempts: u32,
    pub on_limit: LimitAction,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials: vec![Credential::new("admin", "admin123")],
            max_attempts: 3,
            on_limit: LimitAction::Reset,
        }
    }
}

/// What happens once `max_attempts` consecutive logins have failed
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LimitAction {
    /// Report "too many attempts" and start counting again; nothing is blocked
    #[default]
    Reset,
    /// Refuse every attempt until `cooldown_secs` have passed
    Lockout { cooldown_secs: u64 },
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub session_hours: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            session_hours: 24,
        }
    }
}

impl DashboardConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| DashboardError::config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DashboardError::config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Reads `path` when given, otherwise falls back to the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}
