//! Configuration module for the revision backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for the remote control plane.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    /// Base URL of the control plane API
    pub base_url: String,
    /// Namespace holding the load balancers
    pub namespace: String,
    /// Tenant header value
    pub tenant: String,
    /// API token sent as `Authorization: APIToken <token>`
    pub api_token: String,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Remote control plane settings
    pub remote: RemoteSettings,
    /// Period of the automatic snapshot; `None` disables the scheduler
    pub snapshot_interval: Option<Duration>,
}

/// A variable was present but could not be parsed.
#[derive(Debug)]
pub struct ConfigError {
    pub variable: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.variable, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("LBREV_API_PSK").ok().filter(|s| !s.is_empty());

        let db_path = env::var("LBREV_DB_PATH")
            .unwrap_or_else(|_| "./data/revisions.sqlite".to_string())
            .into();

        let bind_addr = parse_var("LBREV_BIND_ADDR", "127.0.0.1:8080")?;

        let log_level = env::var("LBREV_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let timeout_secs: u64 = parse_var("LBREV_REMOTE_TIMEOUT_SECS", "30")?;
        let remote = RemoteSettings {
            base_url: env::var("LBREV_REMOTE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string())
                .trim_end_matches('/')
                .to_string(),
            namespace: env::var("LBREV_REMOTE_NAMESPACE").unwrap_or_else(|_| "default".to_string()),
            tenant: env::var("LBREV_REMOTE_TENANT").unwrap_or_default(),
            api_token: env::var("LBREV_REMOTE_API_TOKEN").unwrap_or_default(),
            timeout: Duration::from_secs(timeout_secs),
        };

        let interval_secs: u64 = parse_var("LBREV_SNAPSHOT_INTERVAL_SECS", "0")?;
        let snapshot_interval = (interval_secs > 0).then(|| Duration::from_secs(interval_secs));

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            remote,
            snapshot_interval,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    variable: &'static str,
    default: &str,
) -> Result<T, ConfigError> {
    let value = env::var(variable).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|_| ConfigError { variable, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 10] = [
        "LBREV_API_PSK",
        "LBREV_DB_PATH",
        "LBREV_BIND_ADDR",
        "LBREV_LOG_LEVEL",
        "LBREV_REMOTE_URL",
        "LBREV_REMOTE_NAMESPACE",
        "LBREV_REMOTE_TENANT",
        "LBREV_REMOTE_API_TOKEN",
        "LBREV_REMOTE_TIMEOUT_SECS",
        "LBREV_SNAPSHOT_INTERVAL_SECS",
    ];

    // Both cases live in one test because they mutate process-wide env vars.
    #[test]
    fn test_config_from_env() {
        for var in VARS {
            env::remove_var(var);
        }

        let config = Config::from_env().unwrap();

        assert!(config.api_psk.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/revisions.sqlite"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.remote.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.remote.namespace, "default");
        assert_eq!(config.remote.timeout, Duration::from_secs(30));
        assert!(config.snapshot_interval.is_none());

        env::set_var("LBREV_REMOTE_URL", "https://tenant.example.com/");
        env::set_var("LBREV_SNAPSHOT_INTERVAL_SECS", "300");
        let config = Config::from_env().unwrap();
        assert_eq!(config.remote.base_url, "https://tenant.example.com");
        assert_eq!(config.snapshot_interval, Some(Duration::from_secs(300)));

        env::set_var("LBREV_SNAPSHOT_INTERVAL_SECS", "soon");
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.variable, "LBREV_SNAPSHOT_INTERVAL_SECS");

        for var in VARS {
            env::remove_var(var);
        }
    }
}
