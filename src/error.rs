//! Error types and handling for the Ocea exporter
//!
//! This module defines the error types used throughout the application,
//! and the classification the fetch loop uses to pick a recovery path.

use thiserror::Error;

/// Result type alias for exporter operations
pub type Result<T> = std::result::Result<T, OceaError>;

/// Main error type for the exporter
#[derive(Debug, Error)]
pub enum OceaError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Network-related errors (connect, TLS, body read)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Non-success HTTP status outside the login flow
    #[error("HTTP error: {context} returned status {status}")]
    Http { status: u16, context: String },

    /// Unexpected but well-formed API response
    #[error("API error: {message}")]
    Api { message: String },

    /// The portal answered with its maintenance body
    #[error("Service unavailable: portal is in maintenance ({message})")]
    Maintenance { message: String },

    /// Authentication/authorization errors
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// A value could not be scraped out of the authorize page
    #[error("Authentication error: settings not found ({field})")]
    SettingsNotFound { field: String },

    /// The confirm redirect did not carry an authorization code
    #[error("Authentication error: no authorization code in redirect")]
    AuthCodeMissing,

    /// Refresh was requested without a refresh token
    #[error("Authentication error: no refresh token available")]
    NoRefreshToken,

    /// A persisted fluid has no dashboard in the fresh data
    #[error("Consistency error: no dashboard for fluid {fluid}")]
    DashboardMissing { fluid: String },

    /// A persisted meter is absent from the fresh device list
    #[error("Consistency error: no device with serial {serial}")]
    DeviceMissing { serial: String },

    /// The year-to-date counter went backwards
    #[error("Yearly counter reset detected for fluid {fluid}")]
    YearlyCounterReset { fluid: String },

    /// Backfill could not assemble one device per fluid
    #[error("Insufficient devices: expected {expected}, found {found}")]
    InsufficientDevices { expected: usize, found: usize },

    /// Account data does not line up (fluids vs devices vs dashboards)
    #[error("Consistency error: {message}")]
    Consistency { message: String },

    /// Metrics registry errors
    #[error("Metrics error: {message}")]
    Metrics { message: String },
}

/// Recovery class of an error, used by the fetch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network trouble, 5xx, maintenance: retry later, keep state
    Transient,
    /// Login or token failures, usually a configuration problem
    Auth,
    /// Account data changed shape: rebuild state from scratch
    Consistency,
    /// Expected branches with a dedicated recovery path
    Policy,
    /// Local failures (disk, config, metrics)
    Internal,
}

impl OceaError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a new HTTP status error
    pub fn http<S: Into<String>>(status: u16, context: S) -> Self {
        Self::Http {
            status,
            context: context.into(),
        }
    }

    /// Create a new API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a new settings-not-found error
    pub fn settings_not_found<S: Into<String>>(field: S) -> Self {
        Self::SettingsNotFound {
            field: field.into(),
        }
    }

    /// Create a new consistency error
    pub fn consistency<S: Into<String>>(message: S) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// Create a new metrics error
    pub fn metrics<S: Into<String>>(message: S) -> Self {
        Self::Metrics {
            message: message.into(),
        }
    }

    /// Map the error onto its recovery class
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::Api { .. }
            | Self::Maintenance { .. } => ErrorClass::Transient,
            Self::Http { status, .. } => {
                if *status == 401 || *status == 403 {
                    ErrorClass::Auth
                } else {
                    ErrorClass::Transient
                }
            }
            Self::Auth { .. }
            | Self::SettingsNotFound { .. }
            | Self::AuthCodeMissing
            | Self::NoRefreshToken => ErrorClass::Auth,
            Self::DashboardMissing { .. }
            | Self::DeviceMissing { .. }
            | Self::Consistency { .. } => ErrorClass::Consistency,
            Self::YearlyCounterReset { .. } | Self::InsufficientDevices { .. } => {
                ErrorClass::Policy
            }
            Self::Config { .. }
            | Self::Validation { .. }
            | Self::Io { .. }
            | Self::Serialization { .. }
            | Self::Metrics { .. } => ErrorClass::Internal,
        }
    }

    /// Worth retrying on the next tick without any other action
    pub const fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// The persisted account data no longer matches the portal
    pub const fn requires_rebuild(&self) -> bool {
        matches!(self.class(), ErrorClass::Consistency)
    }
}

impl From<std::io::Error> for OceaError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for OceaError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for OceaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for OceaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_decode() {
            Self::Serialization {
                message: err.to_string(),
            }
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<url::ParseError> for OceaError {
    fn from(err: url::ParseError) -> Self {
        Self::config(format!("invalid URL: {err}"))
    }
}

impl From<prometheus::Error> for OceaError {
    fn from(err: prometheus::Error) -> Self {
        Self::metrics(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = OceaError::config("test config error");
        assert!(matches!(err, OceaError::Config { .. }));

        let err = OceaError::settings_not_found("csrf");
        assert!(matches!(err, OceaError::SettingsNotFound { ref field } if field == "csrf"));

        let err = OceaError::validation("field", "test validation error");
        assert!(matches!(err, OceaError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = OceaError::config("test error");
        assert_eq!(err.to_string(), "Configuration error: test error");

        let err = OceaError::validation("test_field", "invalid value");
        assert_eq!(err.to_string(), "Validation error: test_field - invalid value");

        let err = OceaError::InsufficientDevices {
            expected: 3,
            found: 2,
        };
        assert_eq!(err.to_string(), "Insufficient devices: expected 3, found 2");
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(OceaError::timeout("slow").class(), ErrorClass::Transient);
        assert_eq!(OceaError::http(503, "dashboard").class(), ErrorClass::Transient);
        assert_eq!(OceaError::http(401, "resident").class(), ErrorClass::Auth);
        assert_eq!(
            OceaError::Maintenance {
                message: String::new()
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(OceaError::NoRefreshToken.class(), ErrorClass::Auth);
        assert_eq!(OceaError::AuthCodeMissing.class(), ErrorClass::Auth);
        assert_eq!(
            OceaError::YearlyCounterReset {
                fluid: "EauFroide".into()
            }
            .class(),
            ErrorClass::Policy
        );
        assert_eq!(OceaError::io("disk full").class(), ErrorClass::Internal);
    }

    #[test]
    fn test_rebuild_predicate() {
        assert!(
            OceaError::DashboardMissing {
                fluid: "Cetc".into()
            }
            .requires_rebuild()
        );
        assert!(OceaError::consistency("count mismatch").requires_rebuild());
        assert!(!OceaError::network("reset by peer").requires_rebuild());
        assert!(OceaError::network("reset by peer").is_transient());
    }
}
