//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the JSON
//! settings file. Each type implements [`Default`] with production values and
//! `#[serde(default)]`, so a partial file only overrides what it names.

mod api;
mod connection;

pub use api::*;
pub use connection::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the chat transport.
///
/// Loaded from `~/.wlmai/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "api": { "host": "api.example.com" },
///   "connection": { "retry": { "strategy": "exponential" } }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Settings schema version.
    pub version: String,
    /// Endpoint addressing.
    pub api: ApiSettings,
    /// Connection lifecycle tuning.
    pub connection: ConnectionSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            api: ApiSettings::default(),
            connection: ConnectionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ChatSettings {
    /// Reject values the transport cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.api.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("api.host must not be empty".into()));
        }
        if self.connection.retry.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.retry.maxAttempts must be at least 1".into(),
            ));
        }
        if self.connection.ready_poll_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.readyPollAttempts must be at least 1".into(),
            ));
        }
        if self.connection.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.outboundBuffer must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.connection.retry.jitter_factor) {
            return Err(SettingsError::InvalidValue(
                "connection.retry.jitterFactor must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (or filter directive) handed to the subscriber.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ChatSettings::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: ChatSettings =
            serde_json::from_str(r#"{"api":{"host":"example.test"}}"#).unwrap();
        assert_eq!(settings.api.host, "example.test");
        assert_eq!(settings.api.base_path, "wlmai");
        assert_eq!(settings.connection.ready_poll_attempts, 20);
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut settings = ChatSettings::default();
        settings.connection.retry.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_ready_attempts_rejected() {
        let mut settings = ChatSettings::default();
        settings.connection.ready_poll_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn out_of_range_jitter_rejected() {
        let mut settings = ChatSettings::default();
        settings.connection.retry.jitter_factor = 1.5;
        assert!(settings.validate().is_err());
    }
}
