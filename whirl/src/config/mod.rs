//! Configuration system for the Whirl client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/whirl/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use whirl_proto::message::UserId;

use crate::connection::ProbePolicy;
use crate::session::{Credentials, SessionConfig};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    auth: AuthFileConfig,
    session: SessionFileConfig,
    storage: StorageFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[auth]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AuthFileConfig {
    token: Option<String>,
    user_id: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    probe_delay_ms: Option<u64>,
    probe_timeout_ms: Option<u64>,
    sent_delay_ms: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// REST API base URL; the socket URL is derived from it.
    pub api_url: String,
    /// Timeout for the socket handshake.
    pub connect_timeout: Duration,
    /// Timeout for each REST request.
    pub request_timeout: Duration,

    // -- Auth --
    /// Bearer token, if supplied.
    pub token: Option<String>,
    /// Authenticated user id, if supplied.
    pub user_id: Option<UserId>,

    // -- Session --
    /// Wait before probing after an abnormal close.
    pub probe_delay: Duration,
    /// Upper bound on the liveness probe.
    pub probe_timeout: Duration,
    /// Delay before a sent direct message is marked "sent".
    pub sent_delay: Duration,
    /// Capacity of the intent channel feeding the session loop.
    pub channel_capacity: usize,

    // -- Storage --
    /// Directory for durable local records.
    pub data_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            token: None,
            user_id: None,
            probe_delay: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
            sent_delay: Duration::from_millis(500),
            channel_capacity: 64,
            data_dir: default_data_dir(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/whirl/config.toml`) is
    /// tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.server.api_url.clone())
                .unwrap_or(defaults.api_url),
            connect_timeout: file
                .server
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            token: cli.token.clone().or_else(|| file.auth.token.clone()),
            user_id: cli.user_id.or(file.auth.user_id).map(UserId::new),
            probe_delay: file
                .session
                .probe_delay_ms
                .map_or(defaults.probe_delay, Duration::from_millis),
            probe_timeout: file
                .session
                .probe_timeout_ms
                .map_or(defaults.probe_timeout, Duration::from_millis),
            sent_delay: file
                .session
                .sent_delay_ms
                .map_or(defaults.sent_delay, Duration::from_millis),
            channel_capacity: file
                .session
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone())
                .unwrap_or(defaults.data_dir),
        }
    }

    /// Credentials supplied through CLI, env or file, if both parts are present.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        let token = self.token.clone().filter(|t| !t.is_empty())?;
        Some(Credentials {
            token,
            user: self.user_id?,
        })
    }

    /// Session timing derived from this configuration.
    #[must_use]
    pub const fn session_config(&self) -> SessionConfig {
        SessionConfig {
            probe: ProbePolicy {
                delay: self.probe_delay,
                timeout: self.probe_timeout,
            },
            sent_delay: self.sent_delay,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Random-match and friend chat in the terminal")]
pub struct CliArgs {
    /// REST API base URL (the socket URL is derived from it).
    #[arg(long, env = "WHIRL_API_URL")]
    pub api_url: Option<String>,

    /// Bearer token from a previous login.
    #[arg(long, env = "WHIRL_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Your user id.
    #[arg(long, env = "WHIRL_USER_ID")]
    pub user_id: Option<u64>,

    /// Directory for local session data.
    #[arg(long, env = "WHIRL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Path to config file (default: `~/.config/whirl/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "WHIRL_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/whirl.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(|| std::env::temp_dir().join("whirl"), |d| d.join("whirl"))
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("whirl").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
