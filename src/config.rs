//! Configuration.
//!
//! Loaded from `flatbridge.toml`:
//!
//! ```toml
//! [clickhouse]
//! host = "localhost"
//! port = 8123
//! database = "default"
//! user = "default"
//! password = ""
//!
//! [transfer]
//! batch_size = 10000
//! preview_limit = 100
//! export_dir = "."
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, BridgeResult};

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_PREVIEW_LIMIT: usize = 100;

const CONFIG_FILE: &str = "flatbridge.toml";

/// ClickHouse ports that speak TLS.
const SECURE_PORTS: &[u16] = &[8443, 9440];

/// Connection parameters for a database session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_name")]
    pub database: String,
    #[serde(default = "default_name")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Bearer token; takes precedence over `password`.
    #[serde(default)]
    pub jwt_token: Option<String>,
    #[serde(default)]
    pub secure: Option<bool>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8123
}

fn default_name() -> String {
    "default".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_name(),
            user: default_name(),
            password: None,
            jwt_token: None,
            secure: None,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = Some(password.into());
        self
    }

    pub fn with_jwt(mut self, token: impl Into<String>) -> Self {
        self.jwt_token = Some(token.into());
        self
    }

    pub fn is_secure(&self) -> bool {
        self.secure.unwrap_or_else(|| SECURE_PORTS.contains(&self.port))
    }

    /// Base URL of the HTTP interface.
    pub fn base_url(&self) -> String {
        let scheme = if self.is_secure() { "https" } else { "http" };
        format!("{}://{}:{}/", scheme, self.host, self.port)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::Config("connection host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(BridgeError::Config("connection port must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("jwt_token", &self.jwt_token.as_ref().map(|_| "<redacted>"))
            .field("secure", &self.is_secure())
            .finish()
    }
}

/// Transfer tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
    /// Where exports without an explicit output file are written.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_preview_limit() -> usize {
    DEFAULT_PREVIEW_LIMIT
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            export_dir: default_export_dir(),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub clickhouse: ConnectionConfig,
    #[serde(default)]
    pub transfer: TransferSettings,
}

impl BridgeConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Otherwise `./flatbridge.toml` and then
    /// `<config dir>/flatbridge/config.toml` are tried, falling back to
    /// defaults. `FLATBRIDGE_*` environment variables are applied last.
    pub fn load(path: Option<&Path>) -> BridgeResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_paths().into_iter().find(|p| p.is_file()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> BridgeResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> BridgeResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("flatbridge").join("config.toml"));
        }
        paths
    }

    /// Apply `FLATBRIDGE_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> BridgeResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ch = &mut self.clickhouse;
        if let Some(host) = lookup("FLATBRIDGE_HOST") {
            ch.host = host;
        }
        if let Some(port) = lookup("FLATBRIDGE_PORT") {
            ch.port = port
                .parse()
                .map_err(|_| BridgeError::Config(format!("invalid FLATBRIDGE_PORT '{}'", port)))?;
        }
        if let Some(database) = lookup("FLATBRIDGE_DATABASE") {
            ch.database = database;
        }
        if let Some(user) = lookup("FLATBRIDGE_USER") {
            ch.user = user;
        }
        if let Some(password) = lookup("FLATBRIDGE_PASSWORD") {
            ch.password = Some(password);
        }
        if let Some(token) = lookup("FLATBRIDGE_JWT") {
            ch.jwt_token = Some(token);
        }
        self.validate()
    }

    pub fn validate(&self) -> BridgeResult<()> {
        self.clickhouse.validate()?;
        if self.transfer.batch_size == 0 {
            return Err(BridgeError::Config("transfer.batch_size must be at least 1".to_string()));
        }
        if self.transfer.preview_limit == 0 {
            return Err(BridgeError::Config(
                "transfer.preview_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
