use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use validator::Validate;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Server configuration with validation
#[derive(Clone, Debug, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server host address
    #[validate(length(min = 1, message = "HTTP host cannot be empty"))]
    pub http_host: String,

    /// HTTP server port (1-65535)
    #[validate(range(
        min = 1,
        max = 65535,
        message = "HTTP port must be between 1 and 65535"
    ))]
    pub http_port: u16,

    /// PostgreSQL connection URL
    #[validate(length(min = 1, message = "database URL cannot be empty"))]
    pub database_url: String,

    #[validate(range(
        min = 1,
        max = 1000,
        message = "database pool size must be between 1 and 1000"
    ))]
    pub db_max_connections: u32,

    /// Whole-request timeout in seconds
    #[validate(range(
        min = 1,
        max = 3600,
        message = "request timeout must be between 1 and 3600 seconds"
    ))]
    pub request_timeout_secs: u64,

    /// Where `/` redirects to
    pub docs_url: String,

    /// Pretty-print every response
    pub development: bool,

    /// Maximum rows per response, also the default limit
    #[validate(range(min = 1, message = "response max must be positive"))]
    pub response_max: i64,

    #[validate(range(min = 0, message = "offset max cannot be negative"))]
    pub offset_max: i64,

    /// Maximum elements in one array parameter
    #[validate(range(min = 1, message = "array max must be positive"))]
    pub array_max: usize,

    pub cache_enabled: bool,

    #[validate(range(min = 1, message = "cache TTL must be at least one second"))]
    pub cache_ttl_secs: u64,

    #[validate(range(min = 1, message = "cache max entries must be positive"))]
    pub cache_max_entries: usize,

    /// Requests per minute per client; 0 disables throttling
    pub throttle_rate_per_minute: u32,

    /// Client addresses exempt from throttling, in addition to loopback
    pub throttle_unlimited: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_host: "127.0.0.1".to_string(),
            http_port: 3000,
            database_url: "postgres://localhost/lexdb".to_string(),
            db_max_connections: 10,
            request_timeout_secs: 120,
            docs_url: "https://dev.panlex.org/api/".to_string(),
            development: false,
            response_max: 2000,
            offset_max: 250_000,
            array_max: 10_000,
            cache_enabled: true,
            cache_ttl_secs: 60 * 60 * 24,
            cache_max_entries: 100_000,
            throttle_rate_per_minute: 0,
            throttle_unlimited: Vec::new(),
        }
    }
}

/// Limits applied while building queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub response_max: i64,
    pub offset_max: i64,
    pub array_max: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for Limits {
    fn from(config: &ServerConfig) -> Self {
        Limits {
            response_max: config.response_max,
            offset_max: config.offset_max,
            array_max: config.array_max,
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables with validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            http_host: env::var("LEXIQUERY_HOST").unwrap_or(defaults.http_host),
            http_port: parse_env_var("LEXIQUERY_PORT", "3000")?,
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: parse_env_var("LEXIQUERY_DB_MAX_CONNECTIONS", "10")?,
            request_timeout_secs: parse_env_var("LEXIQUERY_REQUEST_TIMEOUT", "120")?,
            docs_url: env::var("LEXIQUERY_DOCS_URL").unwrap_or(defaults.docs_url),
            development: parse_env_var("LEXIQUERY_DEVELOPMENT", "false")?,
            response_max: parse_env_var("LEXIQUERY_RESPONSE_MAX", "2000")?,
            offset_max: parse_env_var("LEXIQUERY_OFFSET_MAX", "250000")?,
            array_max: parse_env_var("LEXIQUERY_ARRAY_MAX", "10000")?,
            cache_enabled: parse_env_var("LEXIQUERY_CACHE_ENABLED", "true")?,
            cache_ttl_secs: parse_env_var("LEXIQUERY_CACHE_TTL", "86400")?,
            cache_max_entries: parse_env_var("LEXIQUERY_CACHE_MAX_ENTRIES", "100000")?,
            throttle_rate_per_minute: parse_env_var("LEXIQUERY_THROTTLE_RATE", "0")?,
            throttle_unlimited: env::var("LEXIQUERY_THROTTLE_UNLIMITED")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from YAML file
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "yaml_file".to_string(),
            value: "file read failed".to_string(),
            source: Box::new(e),
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            field: "yaml_content".to_string(),
            value: content,
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides and re-validate
    pub fn merge_cli(mut self, cli: CliConfig) -> Result<Self, ConfigError> {
        if let Some(host) = cli.http_host {
            self.http_host = host;
        }
        if let Some(port) = cli.http_port {
            self.http_port = port;
        }
        if let Some(url) = cli.database_url {
            self.database_url = url;
        }
        if cli.development {
            self.development = true;
        }
        if cli.no_cache {
            self.cache_enabled = false;
        }

        self.validate()?;
        Ok(self)
    }
}

/// CLI configuration (parsed from command line arguments)
#[derive(Clone, Debug, Default)]
pub struct CliConfig {
    pub http_host: Option<String>,
    pub http_port: Option<u16>,
    pub database_url: Option<String>,
    pub development: bool,
    pub no_cache: bool,
}

/// Parse an environment variable with a default value
fn parse_env_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}
