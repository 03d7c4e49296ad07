//! Configuration management for the Ocea exporter
//!
//! This module handles loading, validation, and management of configuration
//! settings from YAML files, with a small set of environment overrides for
//! secrets and deployment paths.

use crate::error::{OceaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Portal account credentials
    pub credentials: CredentialsConfig,

    /// Azure B2C login endpoints and client parameters
    pub auth: AuthConfig,

    /// Vendor REST API location
    pub api: ApiConfig,

    /// Poll loop timing and reconciliation strategy
    pub poll: PollConfig,

    /// State file location
    pub state: StateConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics endpoint configuration
    pub metrics: MetricsConfig,
}

/// Portal account credentials
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Account e-mail used on the resident portal
    pub username: String,

    /// Account password - never written back to disk
    #[serde(skip_serializing)]
    pub password: String,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Azure B2C login parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Resident portal home, used as redirect URI, origin and referer
    pub portal_home: String,

    /// OAuth2 authorize page
    pub authorize_url: String,

    /// OAuth2 token endpoint (code and refresh grants)
    pub token_url: String,

    /// Credentials submission endpoint
    pub self_asserted_url: String,

    /// Login confirmation endpoint, answers with the code redirect
    pub confirm_url: String,

    /// Origin header sent on the B2C form endpoints
    pub login_origin: String,

    /// Public client id of the portal application
    pub client_id: String,

    /// Requested scopes, space separated
    pub scope: String,

    /// B2C user-flow policy name
    pub policy: String,

    /// Browser user agent presented to the login pages
    pub user_agent: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// Vendor REST API location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL, without trailing slash
    pub base_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// Which data source drives the absolute index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileStrategy {
    /// Accumulate year-to-date dashboard deltas onto a device anchor
    #[default]
    Delta,
    /// Compare fresh device readings directly
    Direct,
}

/// Poll loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds between the start of two cycles
    pub interval_secs: u64,

    /// Base delay before retrying a failed cycle, doubled per failure
    pub retry_backoff_secs: u64,

    /// Reconciliation strategy
    pub strategy: ReconcileStrategy,
}

/// State file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Path of the JSON state file
    pub file: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Directory (or file path whose parent is used) for rolling log files
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Emit JSON lines instead of plain text
    pub json_format: bool,
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve /metrics and /health
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address, host:port
    pub listen_addr: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            portal_home: "https://espace-resident.ocea-sb.com".to_string(),
            authorize_url: "https://osbespaceresident.b2clogin.com/osbespaceresident.onmicrosoft.com/b2c_1a_signup_signin/oauth2/v2.0/authorize".to_string(),
            token_url: "https://osbespaceresident.b2clogin.com/osbespaceresident.onmicrosoft.com/b2c_1a_signup_signin/oauth2/v2.0/token".to_string(),
            self_asserted_url: "https://osbespaceresident.b2clogin.com/osbespaceresident.onmicrosoft.com/B2C_1A_SIGNUP_SIGNIN/SelfAsserted".to_string(),
            confirm_url: "https://osbespaceresident.b2clogin.com/osbespaceresident.onmicrosoft.com/B2C_1A_SIGNUP_SIGNIN/api/CombinedSigninAndSignup/confirmed".to_string(),
            login_origin: "https://osbespaceresident.b2clogin.com".to_string(),
            client_id: "1cacfb15-0b3c-42cc-a662-736e4737e7d9".to_string(),
            scope: "https://osbespaceresident.onmicrosoft.com/app-imago-espace-resident-back-prod/user_impersonation openid profile offline_access".to_string(),
            policy: "B2C_1A_SIGNUP_SIGNIN".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/107.0.0.0 Safari/537.36 Edg/107.0.1418.42".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://espace-resident-api.ocea-sb.com/api/v1".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1800,
            retry_backoff_secs: 60,
            strategy: ReconcileStrategy::Delta,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            file: base.join("ocea-exporter").join("state.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/ocea-exporter".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9001".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: CredentialsConfig::default(),
            auth: AuthConfig::default(),
            api: ApiConfig::default(),
            poll: PollConfig::default(),
            state: StateConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AuthConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ApiConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PollConfig {
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from an explicit path, or the first default location found
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let mut default_paths = vec![
            PathBuf::from("ocea-exporter.yaml"),
            PathBuf::from("/etc/ocea-exporter/config.yaml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            default_paths.insert(1, dir.join("ocea-exporter").join("config.yaml"));
        }

        for path in &default_paths {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Self::default())
    }

    /// Overlay values from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OCEA_USERNAME") {
            self.credentials.username = v;
        }
        if let Some(v) = lookup("OCEA_PASSWORD") {
            self.credentials.password = v;
        }
        if let Some(v) = lookup("OCEA_STATE_FILE") {
            self.state.file = PathBuf::from(v);
        }
        if let Some(v) = lookup("OCEA_POLL_INTERVAL_SECS") {
            self.poll.interval_secs = v.trim().parse().map_err(|_| {
                OceaError::validation("OCEA_POLL_INTERVAL_SECS", "Must be a positive integer")
            })?;
        }
        Ok(())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parsed metrics listen address
    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        self.metrics.listen_addr.parse().map_err(|_| {
            OceaError::validation("metrics.listen_addr", "Must be a host:port socket address")
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.credentials.username.trim().is_empty() {
            return Err(OceaError::validation(
                "credentials.username",
                "Username cannot be empty",
            ));
        }

        if self.credentials.password.is_empty() {
            return Err(OceaError::validation(
                "credentials.password",
                "Password cannot be empty",
            ));
        }

        let urls = [
            ("auth.portal_home", &self.auth.portal_home),
            ("auth.authorize_url", &self.auth.authorize_url),
            ("auth.token_url", &self.auth.token_url),
            ("auth.self_asserted_url", &self.auth.self_asserted_url),
            ("auth.confirm_url", &self.auth.confirm_url),
            ("api.base_url", &self.api.base_url),
        ];
        for (field, value) in urls {
            if Url::parse(value).is_err() {
                return Err(OceaError::validation(field, "Must be an absolute URL"));
            }
        }

        if self.auth.timeout_secs == 0 {
            return Err(OceaError::validation(
                "auth.timeout_secs",
                "Must be greater than 0",
            ));
        }

        if self.api.timeout_secs == 0 {
            return Err(OceaError::validation(
                "api.timeout_secs",
                "Must be greater than 0",
            ));
        }

        // Validate polling interval
        if self.poll.interval_secs == 0 {
            return Err(OceaError::validation(
                "poll.interval_secs",
                "Must be greater than 0",
            ));
        }

        if self.poll.retry_backoff_secs == 0 {
            return Err(OceaError::validation(
                "poll.retry_backoff_secs",
                "Must be greater than 0",
            ));
        }

        if self.state.file.as_os_str().is_empty() {
            return Err(OceaError::validation("state.file", "Path cannot be empty"));
        }

        if self.metrics.enabled {
            self.metrics_addr()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.credentials.username = "resident@example.com".to_string();
        config.credentials.password = "hunter2".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll.interval_secs, 1800);
        assert_eq!(config.poll.strategy, ReconcileStrategy::Delta);
        assert_eq!(config.auth.timeout_secs, 5);
        assert_eq!(config.metrics.listen_addr, "127.0.0.1:9001");
        assert!(config.state.file.ends_with("ocea-exporter/state.json"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = valid_config();
        assert!(config.validate().is_ok());

        config.credentials.username = String::new();
        assert!(config.validate().is_err());

        config = valid_config();
        config.poll.interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(OceaError::Validation { ref field, .. }) if field == "poll.interval_secs"
        ));

        config = valid_config();
        config.api.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config = valid_config();
        config.metrics.listen_addr = "localhost".to_string();
        assert!(config.validate().is_err());
        config.metrics.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_password_not_serialized() {
        let config = valid_config();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("resident@example.com"));
        assert!(!yaml.contains("hunter2"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = valid_config();
        let rendered = format!("{config:?}");
        assert!(rendered.contains("resident@example.com"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "credentials:\n  username: a@b.c\n  password: pw\npoll:\n  strategy: direct\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.poll.strategy, ReconcileStrategy::Direct);
        assert_eq!(config.poll.interval_secs, 1800);
        assert_eq!(config.credentials.password, "pw");
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OCEA_USERNAME", "env@example.com"),
            ("OCEA_PASSWORD", "from-env"),
            ("OCEA_STATE_FILE", "/var/lib/ocea/state.json"),
            ("OCEA_POLL_INTERVAL_SECS", "600"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.credentials.username, "env@example.com");
        assert_eq!(config.credentials.password, "from-env");
        assert_eq!(config.state.file, PathBuf::from("/var/lib/ocea/state.json"));
        assert_eq!(config.poll.interval_secs, 600);

        let result = config.apply_overrides(|k| {
            (k == "OCEA_POLL_INTERVAL_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }
}
