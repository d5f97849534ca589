use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "CareBridge";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const ENV_SECRET: &str = "CAREBRIDGE_ENCRYPTION_SECRET";
pub const ENV_DATA_DIR: &str = "CAREBRIDGE_DATA_DIR";
pub const ENV_BIND: &str = "CAREBRIDGE_BIND";
pub const ENV_PUBLIC_URL: &str = "CAREBRIDGE_PUBLIC_URL";
pub const ENV_PRINCIPALS_FILE: &str = "CAREBRIDGE_PRINCIPALS_FILE";
pub const ENV_INSIGHT_URL: &str = "CAREBRIDGE_INSIGHT_URL";
pub const ENV_INSIGHT_MODEL: &str = "CAREBRIDGE_INSIGHT_MODEL";
pub const ENV_INSIGHT_TIMEOUT: &str = "CAREBRIDGE_INSIGHT_TIMEOUT_SECS";

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_INSIGHT_MODEL: &str = "medgemma";
const DEFAULT_INSIGHT_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CAREBRIDGE_ENCRYPTION_SECRET is not set, refusing to start without field encryption")]
    MissingSecret,

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Cannot determine a data directory; set CAREBRIDGE_DATA_DIR")]
    NoDataDir,
}

/// Connection settings for the Insight Service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

/// Immutable process configuration, built once at startup.
#[derive(Clone)]
pub struct AppConfig {
    pub encryption_secret: String,
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub public_url: String,
    pub principals_file: PathBuf,
    /// `None` disables the Insight Service; disputes then carry the fallback text.
    pub insight: Option<InsightConfig>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("encryption_secret", &"<redacted>")
            .field("data_dir", &self.data_dir)
            .field("bind_addr", &self.bind_addr)
            .field("public_url", &self.public_url)
            .field("principals_file", &self.principals_file)
            .field("insight", &self.insight)
            .finish()
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup (tests inject a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let encryption_secret = get(ENV_SECRET).ok_or(ConfigError::MissingSecret)?;

        let data_dir = match get(ENV_DATA_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir().ok_or(ConfigError::NoDataDir)?,
        };

        let bind_raw = get(ENV_BIND).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr: SocketAddr = bind_raw.parse().map_err(|e| ConfigError::Invalid {
            name: ENV_BIND,
            reason: format!("{e}"),
        })?;

        let public_url = get(ENV_PUBLIC_URL)
            .unwrap_or_else(|| format!("http://{bind_addr}"))
            .trim_end_matches('/')
            .to_string();

        let principals_file = get(ENV_PRINCIPALS_FILE)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("principals.json"));

        let insight = match get(ENV_INSIGHT_URL) {
            Some(base_url) => {
                let timeout_secs = match get(ENV_INSIGHT_TIMEOUT) {
                    Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                        name: ENV_INSIGHT_TIMEOUT,
                        reason: format!("{e}"),
                    })?,
                    None => DEFAULT_INSIGHT_TIMEOUT_SECS,
                };
                Some(InsightConfig {
                    base_url,
                    model: get(ENV_INSIGHT_MODEL)
                        .unwrap_or_else(|| DEFAULT_INSIGHT_MODEL.to_string()),
                    timeout_secs,
                })
            }
            None => None,
        };

        Ok(Self {
            encryption_secret,
            data_dir,
            bind_addr,
            public_url,
            principals_file,
            insight,
        })
    }

    /// SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("carebridge.db")
    }

    /// Directory the local Blob Store writes artifacts into.
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

/// ~/CareBridge/ on all platforms
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_NAME))
}

/// Tracing filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "carebridge_lib=info,carebridge=info,tower_http=warn"
}
