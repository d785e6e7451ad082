//! Common configuration types for the capture relay crates.

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default log level when `CAPTURE_LOG_LEVEL` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// Read `CAPTURE_LOG_LEVEL` and `CAPTURE_JSON_LOGS` from a variable map.
    ///
    /// # Errors
    ///
    /// Returns `CommonError::Configuration` if the log level is unknown or
    /// `CAPTURE_JSON_LOGS` is not a boolean.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let log_level = match vars.get("CAPTURE_LOG_LEVEL") {
            Some(level) => {
                let level = level.trim().to_ascii_lowercase();
                if !matches!(
                    level.as_str(),
                    "trace" | "debug" | "info" | "warn" | "error"
                ) {
                    return Err(CommonError::Configuration(format!(
                        "CAPTURE_LOG_LEVEL must be one of trace, debug, info, warn, error; got {level}"
                    )));
                }
                level
            }
            None => DEFAULT_LOG_LEVEL.to_string(),
        };

        let json_logs = match vars.get("CAPTURE_JSON_LOGS") {
            Some(raw) => parse_bool(raw).ok_or_else(|| {
                CommonError::Configuration(format!(
                    "CAPTURE_JSON_LOGS must be a boolean, got {raw}"
                ))
            })?,
            None => false,
        };

        Ok(Self {
            log_level,
            json_logs,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
