use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use validator::Validate;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Parse error for {field}: {value}")]
    Parse { field: String, value: String },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Server configuration with validation
#[derive(Clone, Debug, Validate, Serialize, Deserialize)]
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

    /// Base URL of the upstream search backend
    #[validate(length(min = 1, message = "Upstream URL cannot be empty"))]
    pub upstream_url: String,

    /// Value-set bound applied to joins without an explicit `size`
    #[validate(range(
        min = 1,
        max = 10_000_000,
        message = "Default lookup size must be between 1 and 10000000"
    ))]
    pub default_lookup_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            upstream_url: "http://localhost:9200".to_string(),
            default_lookup_size: 50_000,
        }
    }
}

/// Configuration values collected from the command line
#[derive(Clone, Debug)]
pub struct CliConfig {
    pub http_host: String,
    pub http_port: u16,
    pub upstream_url: Option<String>,
    pub default_lookup_size: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ServerConfig::default();
        let config = ServerConfig {
            http_host: env_or("FILTERJOIN_HTTP_HOST", defaults.http_host),
            http_port: parse_env("FILTERJOIN_HTTP_PORT", defaults.http_port)?,
            upstream_url: env_or("FILTERJOIN_UPSTREAM_URL", defaults.upstream_url),
            default_lookup_size: parse_env(
                "FILTERJOIN_DEFAULT_LOOKUP_SIZE",
                defaults.default_lookup_size,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI arguments over the environment configuration. CLI wins
    /// for anything it sets explicitly.
    pub fn from_cli(cli: CliConfig) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        let config = ServerConfig {
            http_host: cli.http_host,
            http_port: cli.http_port,
            upstream_url: cli.upstream_url.unwrap_or(env_config.upstream_url),
            default_lookup_size: cli.default_lookup_size,
        };
        config.validate()?;
        Ok(config)
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Parse {
            field: key.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_fails_validation() {
        let config = ServerConfig {
            http_port: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_upstream_url_fails_validation() {
        let config = ServerConfig {
            upstream_url: String::new(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let config = ServerConfig::from_cli(CliConfig {
            http_host: "127.0.0.1".to_string(),
            http_port: 9999,
            upstream_url: Some("http://search:9200".to_string()),
            default_lookup_size: 1234,
        })
        .unwrap();
        assert_eq!(config.http_host, "127.0.0.1");
        assert_eq!(config.http_port, 9999);
        assert_eq!(config.upstream_url, "http://search:9200");
        assert_eq!(config.default_lookup_size, 1234);
    }
}
