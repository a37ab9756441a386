//! # Locator Configuration
//!
//! `LocatorOptions` is what the outside world provides: every field is
//! optional so the CLI/env layer can be merged over a JSON file, which is in
//! turn merged over the defaults. `LocatorConfig` is the validated result that
//! the rest of the process is built from.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Config file read when `--config-path` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "server_locator.json";

const DEFAULT_MQTT_PORT: u16 = 1883;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors raised while loading or validating configuration. All of them are
/// fatal at start-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    FileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required setting: {0}")]
    MissingValue(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Device location ingest, enrichment and query server", version)]
#[serde(rename_all = "camelCase")]
pub struct LocatorOptions {
    #[clap(long, env = "LOCATOR_PORT", help = "HTTP port for the query API and live stream.")]
    pub port: Option<u16>,

    #[clap(long, env = "LOCATOR_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LOCATOR_DATABASE_URL", help = "PostgreSQL connection URL.")]
    pub database_url: Option<String>,

    #[clap(long, env = "LOCATOR_DATABASE_MAX_CONNECTIONS", help = "Maximum pooled database connections.")]
    pub database_max_connections: Option<usize>,

    #[clap(long, env = "LOCATOR_MQTT_URL", help = "Broker address, e.g. tcp://localhost:1883.")]
    pub mqtt_url: Option<String>,

    #[clap(long, env = "LOCATOR_MQTT_CLIENT_ID", help = "MQTT client identifier.")]
    pub mqtt_client_id: Option<String>,

    #[clap(long, env = "LOCATOR_MQTT_USERNAME", help = "MQTT username.")]
    pub mqtt_username: Option<String>,

    #[clap(long, env = "LOCATOR_MQTT_PASSWORD", help = "MQTT password.")]
    pub mqtt_password: Option<String>,

    #[clap(long, env = "LOCATOR_MQTT_TOPIC", help = "Wildcard topic covering every device.")]
    pub mqtt_topic: Option<String>,

    #[clap(long, env = "LOCATOR_MQTT_RECONNECT_DELAY_MS", help = "Pause between broker reconnect attempts.")]
    pub mqtt_reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "LOCATOR_GEOCODE_API_URL", help = "Base URL of the geocoding provider.")]
    pub geocode_api_url: Option<String>,

    #[clap(long, env = "LOCATOR_GEOCODE_API_KEY", help = "API key sent to the geocoding provider.")]
    pub geocode_api_key: Option<String>,

    #[clap(long, env = "LOCATOR_GEOCODE_MAX_RETRIES", help = "Transport-level retries per geocoding request.")]
    pub geocode_max_retries: Option<u32>,

    #[clap(long, env = "LOCATOR_DEVICE_IDS", value_delimiter = ',', help = "Device identities reported by the list endpoint.")]
    pub device_ids: Option<Vec<String>>,

    #[clap(long, env = "LOCATOR_ENRICHMENT_QUEUE_CAPACITY", help = "Capacity of the enrichment doorbell queue.")]
    pub enrichment_queue_capacity: Option<usize>,

    #[clap(long, env = "LOCATOR_SHUTDOWN_GRACE_SECONDS", help = "Upper bound for draining work at shutdown.")]
    pub shutdown_grace_seconds: Option<u64>,

    #[clap(long, env = "LOCATOR_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LOCATOR_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "LOCATOR_PRODUCTION", help = "Send alerts for internal errors.")]
    pub production: Option<bool>,
}

impl LocatorOptions {
    /// Built-in defaults, the lowest precedence layer.
    pub fn defaults() -> Self {
        Self {
            port: Some(8000),
            database_max_connections: Some(10),
            mqtt_url: Some(format!("tcp://localhost:{}", DEFAULT_MQTT_PORT)),
            mqtt_client_id: Some("locator".to_string()),
            mqtt_topic: Some("owntracks/#".to_string()),
            mqtt_reconnect_delay_ms: Some(1000),
            geocode_max_retries: Some(0),
            device_ids: Some(vec!["owntracks".to_string()]),
            enrichment_queue_capacity: Some(100),
            shutdown_grace_seconds: Some(10),
            log_level: Some("info".to_string()),
            production: Some(false),
            ..Default::default()
        }
    }

    // 'other' overrides 'self' for Some values
    fn merge(self, other: LocatorOptions) -> LocatorOptions {
        LocatorOptions {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            database_url: other.database_url.or(self.database_url),
            database_max_connections: other.database_max_connections.or(self.database_max_connections),
            mqtt_url: other.mqtt_url.or(self.mqtt_url),
            mqtt_client_id: other.mqtt_client_id.or(self.mqtt_client_id),
            mqtt_username: other.mqtt_username.or(self.mqtt_username),
            mqtt_password: other.mqtt_password.or(self.mqtt_password),
            mqtt_topic: other.mqtt_topic.or(self.mqtt_topic),
            mqtt_reconnect_delay_ms: other.mqtt_reconnect_delay_ms.or(self.mqtt_reconnect_delay_ms),
            geocode_api_url: other.geocode_api_url.or(self.geocode_api_url),
            geocode_api_key: other.geocode_api_key.or(self.geocode_api_key),
            geocode_max_retries: other.geocode_max_retries.or(self.geocode_max_retries),
            device_ids: other.device_ids.or(self.device_ids),
            enrichment_queue_capacity: other.enrichment_queue_capacity.or(self.enrichment_queue_capacity),
            shutdown_grace_seconds: other.shutdown_grace_seconds.or(self.shutdown_grace_seconds),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            production: other.production.or(self.production),
        }
    }

    /// Reads a JSON options file. A missing file is not an error.
    pub fn from_file(path: &Path) -> Result<Option<LocatorOptions>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let options = serde_json::from_str::<LocatorOptions>(&raw).map_err(|source| ConfigError::FileParse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(options))
    }
}

/// # Locator Configuration
///
/// Fully resolved settings. Constructed once at start-up and handed to each
/// component; nothing reads configuration from global state.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: usize,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    /// Username and password, only ever set together.
    pub mqtt_credentials: Option<(String, String)>,
    pub mqtt_topic: String,
    pub mqtt_reconnect_delay: Duration,
    pub geocode_api_url: Url,
    pub geocode_api_key: Option<String>,
    pub geocode_max_retries: u32,
    pub device_ids: Vec<String>,
    pub enrichment_queue_capacity: usize,
    pub shutdown_grace: Duration,
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
    pub production: bool,
    /// Where the JSON layer was looked for.
    pub config_path: PathBuf,
    /// Whether that file existed and was merged in.
    pub config_file_loaded: bool,
}

impl LocatorConfig {
    /// Parses the process arguments and environment, then layers them over the
    /// config file and the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(LocatorOptions::parse())
    }

    /// Same as [`LocatorConfig::load`] for already parsed CLI options.
    pub fn load_from(cli: LocatorOptions) -> Result<Self, ConfigError> {
        let config_path = cli
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut merged = LocatorOptions::defaults();
        let file_options = LocatorOptions::from_file(&config_path)?;
        let config_file_loaded = file_options.is_some();
        if let Some(file_options) = file_options {
            merged = merged.merge(file_options);
        }
        merged = merged.merge(cli);

        let mut config = Self::resolve(merged)?;
        config.config_path = config_path;
        config.config_file_loaded = config_file_loaded;
        Ok(config)
    }

    /// Validates merged options and turns them into a concrete configuration.
    pub fn resolve(options: LocatorOptions) -> Result<Self, ConfigError> {
        let database_url = options
            .database_url
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingValue("databaseUrl"))?;

        let database_max_connections = options.database_max_connections.unwrap_or(10);
        if database_max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: "databaseMaxConnections",
                reason: "must be at least 1".to_string(),
            });
        }

        let mqtt_url = options.mqtt_url.ok_or(ConfigError::MissingValue("mqttUrl"))?;
        let (mqtt_host, mqtt_port) = parse_broker_url(&mqtt_url)?;

        let mqtt_credentials = match (options.mqtt_username, options.mqtt_password) {
            (Some(user), Some(pass)) => Some((user, pass)),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::InvalidValue {
                    key: "mqttPassword",
                    reason: "a username was given without a password".to_string(),
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    key: "mqttUsername",
                    reason: "a password was given without a username".to_string(),
                })
            }
        };

        let raw_geocode_url = options
            .geocode_api_url
            .ok_or(ConfigError::MissingValue("geocodeApiUrl"))?;
        let geocode_api_url = Url::parse(&raw_geocode_url).map_err(|e| ConfigError::InvalidValue {
            key: "geocodeApiUrl",
            reason: e.to_string(),
        })?;

        let enrichment_queue_capacity = options.enrichment_queue_capacity.unwrap_or(100);
        if enrichment_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "enrichmentQueueCapacity",
                reason: "must be at least 1".to_string(),
            });
        }

        let log_level = options.log_level.unwrap_or_else(|| "info".to_string()).to_lowercase();
        if !LOG_LEVELS.contains(&log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logLevel",
                reason: format!("expected one of {:?}, got {}", LOG_LEVELS, log_level),
            });
        }

        Ok(Self {
            port: options.port.unwrap_or(8000),
            database_url,
            database_max_connections,
            mqtt_host,
            mqtt_port,
            mqtt_client_id: options.mqtt_client_id.unwrap_or_else(|| "locator".to_string()),
            mqtt_credentials,
            mqtt_topic: options.mqtt_topic.unwrap_or_else(|| "owntracks/#".to_string()),
            mqtt_reconnect_delay: Duration::from_millis(options.mqtt_reconnect_delay_ms.unwrap_or(1000)),
            geocode_api_url,
            geocode_api_key: options.geocode_api_key,
            geocode_max_retries: options.geocode_max_retries.unwrap_or(0),
            device_ids: options.device_ids.unwrap_or_default(),
            enrichment_queue_capacity,
            shutdown_grace: Duration::from_secs(options.shutdown_grace_seconds.unwrap_or(10)),
            log_dir: options.log_dir,
            log_level,
            production: options.production.unwrap_or(false),
            config_path: options
                .config_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
            config_file_loaded: false,
        })
    }
}

impl fmt::Display for LocatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LocatorConfig
    Port: {},
    Database: (hidden), pool size {},
    Broker: {}:{} as {} ({}), topic {},
    Geocoder: {},
    Devices: {:?},
    Queue capacity: {},
    Log level: {}, production: {}
",
            self.port,
            self.database_max_connections,
            self.mqtt_host,
            self.mqtt_port,
            self.mqtt_client_id,
            if self.mqtt_credentials.is_some() { "authenticated" } else { "anonymous" },
            self.mqtt_topic,
            self.geocode_api_url,
            self.device_ids,
            self.enrichment_queue_capacity,
            self.log_level,
            self.production
        )
    }
}

/// Splits `tcp://host:port` (or `mqtt://`) into host and port.
pub fn parse_broker_url(raw: &str) -> Result<(String, u16), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue { key: "mqttUrl", reason };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "tcp" | "mqtt") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host".to_string()))?;
    Ok((host.to_string(), url.port().unwrap_or(DEFAULT_MQTT_PORT)))
}
