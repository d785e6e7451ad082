//! Capture client configuration.
//!
//! Configuration is loaded from environment variables. The access token is
//! redacted in Debug output.

use crate::feed::DEFAULT_FEED_CAPACITY;
use crate::relay::state::{ReconnectPolicy, DEFAULT_RECONNECT_BACKOFF};
use crate::session::control::{AttendanceStartRequest, DEFAULT_HTTP_TIMEOUT_SECS};
use common::config::ObservabilityConfig;
use common::secret::{is_present, AccessToken, SecretString};
use common::types::StreamName;
use relay_protocol::address::ChannelAddress;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Stream started automatically at launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoStart {
    pub stream_name: StreamName,
    pub source_url: String,
}

/// Attendance session started automatically on the auto-start stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoAttendance {
    pub subject: String,
    pub department: String,
    pub semester: String,
    /// Section (default: `A`)
    pub section: String,
}

/// Capture client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// REST API base URL (e.g. `http://localhost:8000`).
    pub api_base_url: String,

    /// WebSocket address derived from `api_base_url`.
    pub channel_address: ChannelAddress,

    /// Bearer token for REST calls and relay URLs.
    /// Protected by `SecretString` to prevent accidental logging.
    pub access_token: AccessToken,

    /// Delay before reconnecting a dropped relay (default: 3s).
    pub reconnect_backoff: Duration,

    /// Reconnect attempts before giving up (default: unlimited).
    pub max_reconnect_attempts: Option<u32>,

    /// Recognition feed capacity (default: 100).
    pub feed_capacity: usize,

    /// REST request timeout (default: 10s).
    pub http_timeout: Duration,

    /// Stream to start at launch, if configured.
    pub auto_start: Option<AutoStart>,

    /// Attendance session to start on the auto-start stream, if configured.
    pub auto_attendance: Option<AutoAttendance>,

    pub observability: ObservabilityConfig,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("access_token", &"[REDACTED]")
            .field("reconnect_backoff", &self.reconnect_backoff)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("feed_capacity", &self.feed_capacity)
            .field("http_timeout", &self.http_timeout)
            .field("auto_start", &self.auto_start)
            .field("auto_attendance", &self.auto_attendance)
            .field("observability", &self.observability)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_var<T: FromStr>(vars: &HashMap<String, String>, key: &str) -> Result<Option<T>, ConfigError> {
    match vars.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            ConfigError::InvalidValue(format!("{key} must be a positive integer, got '{raw}'"))
        }),
    }
}

fn non_blank<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `CAPTURE_API_URL` or
    /// `CAPTURE_ACCESS_TOKEN` is absent, and `ConfigError::InvalidValue` for
    /// malformed values or when only one of the auto-start variables is set.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let api_base_url = non_blank(vars, "CAPTURE_API_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("CAPTURE_API_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let channel_address = ChannelAddress::from_api_base(&api_base_url)
            .map_err(|e| ConfigError::InvalidValue(format!("CAPTURE_API_URL: {e}")))?;

        let access_token = SecretString::from(
            vars.get("CAPTURE_ACCESS_TOKEN")
                .ok_or_else(|| ConfigError::MissingEnvVar("CAPTURE_ACCESS_TOKEN".to_string()))?
                .clone(),
        );
        if !is_present(&access_token) {
            return Err(ConfigError::InvalidValue(
                "CAPTURE_ACCESS_TOKEN must not be blank".to_string(),
            ));
        }

        let reconnect_backoff = parse_var::<u64>(vars, "CAPTURE_RECONNECT_BACKOFF_MS")?
            .map_or(DEFAULT_RECONNECT_BACKOFF, Duration::from_millis);

        let max_reconnect_attempts = parse_var::<u32>(vars, "CAPTURE_MAX_RECONNECT_ATTEMPTS")?;

        let feed_capacity =
            parse_var::<usize>(vars, "CAPTURE_FEED_CAPACITY")?.unwrap_or(DEFAULT_FEED_CAPACITY);
        if feed_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "CAPTURE_FEED_CAPACITY must be at least 1".to_string(),
            ));
        }

        let http_timeout_secs = parse_var::<u64>(vars, "CAPTURE_HTTP_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        if http_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "CAPTURE_HTTP_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }

        let auto_start = match (
            non_blank(vars, "CAPTURE_STREAM_NAME"),
            non_blank(vars, "CAPTURE_STREAM_SOURCE_URL"),
        ) {
            (Some(name), Some(source_url)) => Some(AutoStart {
                stream_name: StreamName::new(name)
                    .map_err(|e| ConfigError::InvalidValue(format!("CAPTURE_STREAM_NAME: {e}")))?,
                source_url: source_url.to_string(),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidValue(
                    "CAPTURE_STREAM_NAME and CAPTURE_STREAM_SOURCE_URL must be set together"
                        .to_string(),
                ))
            }
        };

        let auto_attendance = match non_blank(vars, "CAPTURE_ATTENDANCE_SUBJECT") {
            None => None,
            Some(_) if auto_start.is_none() => {
                return Err(ConfigError::InvalidValue(
                    "CAPTURE_ATTENDANCE_SUBJECT requires CAPTURE_STREAM_NAME".to_string(),
                ))
            }
            Some(subject) => {
                let required = |key: &str| {
                    non_blank(vars, key)
                        .map(str::to_string)
                        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
                };
                Some(AutoAttendance {
                    subject: subject.to_string(),
                    department: required("CAPTURE_ATTENDANCE_DEPARTMENT")?,
                    semester: required("CAPTURE_ATTENDANCE_SEMESTER")?,
                    section: non_blank(vars, "CAPTURE_ATTENDANCE_SECTION")
                        .unwrap_or(AttendanceStartRequest::DEFAULT_SECTION)
                        .to_string(),
                })
            }
        };

        let observability = ObservabilityConfig::from_vars(vars)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        Ok(Self {
            api_base_url,
            channel_address,
            access_token,
            reconnect_backoff,
            max_reconnect_attempts,
            feed_capacity,
            http_timeout: Duration::from_secs(http_timeout_secs),
            auto_start,
            auto_attendance,
            observability,
        })
    }

    /// Reconnect policy for both relays.
    #[must_use]
    pub const fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            backoff: self.reconnect_backoff,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "CAPTURE_API_URL".to_string(),
                "http://localhost:8000/".to_string(),
            ),
            (
                "CAPTURE_ACCESS_TOKEN".to_string(),
                "eyJhbGciOiJIUzI1NiJ9.test".to_string(),
            ),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = ClientConfig::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.channel_address.scheme(), "ws");
        assert_eq!(
            config.access_token.expose_secret(),
            "eyJhbGciOiJIUzI1NiJ9.test"
        );
        assert_eq!(config.reconnect_backoff, Duration::from_secs(3));
        assert_eq!(config.max_reconnect_attempts, None);
        assert_eq!(config.feed_capacity, 100);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert!(config.auto_start.is_none());
        assert!(!config.observability.json_logs);
    }

    #[test]
    fn test_from_vars_custom_values() {
        let mut vars = base_vars();
        vars.insert("CAPTURE_API_URL".to_string(), "https://api.example.edu/api".to_string());
        vars.insert("CAPTURE_RECONNECT_BACKOFF_MS".to_string(), "500".to_string());
        vars.insert("CAPTURE_MAX_RECONNECT_ATTEMPTS".to_string(), "5".to_string());
        vars.insert("CAPTURE_FEED_CAPACITY".to_string(), "50".to_string());
        vars.insert("CAPTURE_HTTP_TIMEOUT_SECS".to_string(), "3".to_string());
        vars.insert("CAPTURE_STREAM_NAME".to_string(), "cam1".to_string());
        vars.insert(
            "CAPTURE_STREAM_SOURCE_URL".to_string(),
            "rtsp://10.0.0.5:554/live".to_string(),
        );
        vars.insert("CAPTURE_JSON_LOGS".to_string(), "true".to_string());

        let config = ClientConfig::from_vars(&vars).unwrap();

        assert_eq!(config.channel_address.scheme(), "wss");
        assert_eq!(
            config.reconnect_policy(),
            ReconnectPolicy {
                backoff: Duration::from_millis(500),
                max_attempts: Some(5),
            }
        );
        assert_eq!(config.feed_capacity, 50);
        assert_eq!(config.http_timeout, Duration::from_secs(3));
        let auto_start = config.auto_start.unwrap();
        assert_eq!(auto_start.stream_name.as_str(), "cam1");
        assert_eq!(auto_start.source_url, "rtsp://10.0.0.5:554/live");
        assert!(config.observability.json_logs);
    }

    #[test]
    fn test_missing_required_vars() {
        let mut vars = base_vars();
        vars.remove("CAPTURE_ACCESS_TOKEN");
        assert!(matches!(
            ClientConfig::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(name)) if name == "CAPTURE_ACCESS_TOKEN"
        ));

        let mut vars = base_vars();
        vars.remove("CAPTURE_API_URL");
        assert!(matches!(
            ClientConfig::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(name)) if name == "CAPTURE_API_URL"
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for (key, value) in [
            ("CAPTURE_RECONNECT_BACKOFF_MS", "soon"),
            ("CAPTURE_MAX_RECONNECT_ATTEMPTS", "-1"),
            ("CAPTURE_FEED_CAPACITY", "0"),
            ("CAPTURE_HTTP_TIMEOUT_SECS", "0"),
            ("CAPTURE_API_URL", "ftp://files.example.com"),
            ("CAPTURE_ACCESS_TOKEN", "   "),
            ("CAPTURE_LOG_LEVEL", "verbose"),
        ] {
            let mut vars = base_vars();
            vars.insert(key.to_string(), value.to_string());
            assert!(
                matches!(ClientConfig::from_vars(&vars), Err(ConfigError::InvalidValue(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_auto_start_requires_both_vars() {
        let mut vars = base_vars();
        vars.insert("CAPTURE_STREAM_NAME".to_string(), "cam1".to_string());
        assert!(matches!(
            ClientConfig::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_auto_attendance() {
        let mut vars = base_vars();
        vars.insert("CAPTURE_ATTENDANCE_SUBJECT".to_string(), "CS501".to_string());
        assert!(matches!(
            ClientConfig::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));

        vars.insert("CAPTURE_STREAM_NAME".to_string(), "cam1".to_string());
        vars.insert(
            "CAPTURE_STREAM_SOURCE_URL".to_string(),
            "rtsp://10.0.0.5/live".to_string(),
        );
        assert!(matches!(
            ClientConfig::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(name)) if name == "CAPTURE_ATTENDANCE_DEPARTMENT"
        ));

        vars.insert("CAPTURE_ATTENDANCE_DEPARTMENT".to_string(), "CSE".to_string());
        vars.insert("CAPTURE_ATTENDANCE_SEMESTER".to_string(), "5".to_string());
        let attendance = ClientConfig::from_vars(&vars).unwrap().auto_attendance.unwrap();
        assert_eq!(attendance.subject, "CS501");
        assert_eq!(attendance.section, "A");
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ClientConfig::from_vars(&base_vars()).unwrap();
        let debug = format!("{config:?}");

        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("eyJhbGciOiJIUzI1NiJ9.test"));
        assert!(debug.contains("localhost:8000"));
    }
}
