use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{env, fs, path::PathBuf, time::Duration};
use thiserror::Error;

pub const ENV_SERVER_PORT: &str = "ROUNDTABLE_SERVER_PORT";
pub const ENV_LOG_LEVEL: &str = "ROUNDTABLE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "ROUNDTABLE_LOG_FORMAT";
pub const ENV_STREAM_TTL_SECONDS: &str = "ROUNDTABLE_STREAM_TTL_SECONDS";
pub const ENV_STALE_TIMEOUT_MS: &str = "ROUNDTABLE_STALE_TIMEOUT_MS";

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported configuration format for {}; use yaml or json", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {name} value: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Deployment profile selecting the baseline defaults.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Dev,
    Test,
    Prod,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl TryFrom<&str> for LogFormat {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err("invalid log format"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorsConfig {
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: false,
            max_age_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_id_header: String,
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_id_header: "x-request-id".to_string(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Buffered stream retention and liveness settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamsConfig {
    /// Lifetime of chunk and meta keys, counted from creation.
    pub buffer_ttl_seconds: u64,
    /// Quiet window after which an active stream is abandoned.
    pub stale_timeout_ms: u64,
    /// How often a live resume checks the buffer for new chunks.
    pub replay_poll_interval_ms: u64,
    pub janitor_interval_seconds: u64,
    /// Longest a producer may hold a stream open. Zero disables the limit.
    pub producer_timeout_seconds: u64,
}

impl StreamsConfig {
    #[must_use]
    pub fn producer_timeout(&self) -> Option<Duration> {
        (self.producer_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.producer_timeout_seconds))
    }
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            buffer_ttl_seconds: 3600,
            stale_timeout_ms: 30_000,
            replay_poll_interval_ms: 250,
            janitor_interval_seconds: 60,
            producer_timeout_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureFlags {
    pub metrics: bool,
    /// Exposes the producer write endpoints under `/api/streams`.
    pub ingest_api: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            metrics: true,
            ingest_api: true,
        }
    }
}

/// The main configuration structure for the Roundtable server and CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub profile: Profile,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub streams: StreamsConfig,
    pub features: FeatureFlags,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_for_profile(Profile::Dev)
    }
}

impl Config {
    /// Baseline configuration for a profile.
    #[must_use]
    pub fn default_for_profile(profile: Profile) -> Self {
        let mut config = Self {
            profile,
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            streams: StreamsConfig::default(),
            features: FeatureFlags::default(),
        };

        match profile {
            Profile::Dev => {
                config.logging.level = "debug".to_string();
            }
            Profile::Test => {
                config.logging.level = "warn".to_string();
                config.features.metrics = false;
                config.streams.replay_poll_interval_ms = 20;
            }
            Profile::Prod => {
                config.server.host = "0.0.0.0".to_string();
                config.logging.format = LogFormat::Json;
                config.streams.producer_timeout_seconds = 600;
            }
        }

        config
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a `.yaml`, `.yml` or `.json` file.
    /// * `port_override` - Optional port number overriding every other source.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or parsed, an
    /// environment override is malformed, or the result fails validation.
    pub fn load_config(
        config_path: Option<PathBuf>,
        port_override: Option<u16>,
    ) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides()?;

        if let Some(port) = port_override {
            config.server.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads a file and layers it over the baseline of the profile it names.
    fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        let document: Value = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => serde_yml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => return Err(ConfigError::UnsupportedFormat(path)),
        };

        let profile = match document.get("profile") {
            Some(value) if !value.is_null() => serde_json::from_value(value.clone())?,
            _ => Profile::default(),
        };
        let mut merged = serde_json::to_value(Self::default_for_profile(profile))?;
        merge_values(&mut merged, document);
        Ok(serde_json::from_value(merged)?)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(port) = parse_env(ENV_SERVER_PORT)? {
            self.server.port = port;
        }
        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Ok(format) = env::var(ENV_LOG_FORMAT) {
            self.logging.format =
                LogFormat::try_from(format.as_str()).map_err(|_| ConfigError::InvalidEnv {
                    name: ENV_LOG_FORMAT,
                    value: format.clone(),
                })?;
        }
        if let Some(ttl) = parse_env(ENV_STREAM_TTL_SECONDS)? {
            self.streams.buffer_ttl_seconds = ttl;
        }
        if let Some(timeout) = parse_env(ENV_STALE_TIMEOUT_MS)? {
            self.streams.stale_timeout_ms = timeout;
        }
        Ok(())
    }

    /// Checks values every component relies on.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid(
                "server port must be greater than 0".to_string(),
            ));
        }
        if self.streams.stale_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "streams.stale_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.streams.buffer_ttl_seconds == 0 {
            return Err(ConfigError::Invalid(
                "streams.buffer_ttl_seconds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Stale timeout as signed milliseconds for timestamp arithmetic.
    #[must_use]
    pub fn stale_timeout_ms(&self) -> i64 {
        i64::try_from(self.streams.stale_timeout_ms).unwrap_or(i64::MAX)
    }
}

/// Overlays `patch` onto `base`, recursing into objects. Nulls keep the base value.
fn merge_values(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (slot, value) => *slot = value,
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        Err(_) => Ok(None),
    }
}
