//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a settings file only needs the
//! keys it overrides.

use serde::{Deserialize, Serialize};
use switchboard_core::constants;

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    /// Endpoint of the primary admin link.
    pub primary_url: String,
    /// Timing shared by every link.
    pub links: LinkTimingSettings,
    /// How the secondary endpoint is derived from the fetched config.
    pub secondary: SecondarySettings,
    /// Tertiary (push-event) link.
    pub tertiary: TertiarySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for SwitchboardSettings {
    fn default() -> Self {
        Self {
            primary_url: constants::DEFAULT_PRIMARY_URL.to_string(),
            links: LinkTimingSettings::default(),
            secondary: SecondarySettings::default(),
            tertiary: TertiarySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl SwitchboardSettings {
    /// Reject values the link supervisors cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.primary_url.is_empty() {
            return Err(SettingsError::invalid("primaryUrl", "is empty"));
        }
        let timings = [
            ("links.reconnectDelayMs", self.links.reconnect_delay_ms),
            ("links.connectTimeoutMs", self.links.connect_timeout_ms),
            ("links.requestTimeoutMs", self.links.request_timeout_ms),
        ];
        if let Some((key, _)) = timings.into_iter().find(|(_, ms)| *ms == 0) {
            return Err(SettingsError::invalid(key, "must be > 0"));
        }
        if self.links.command_buffer == 0 {
            return Err(SettingsError::invalid("links.commandBuffer", "must be > 0"));
        }
        for (key, path) in [
            ("secondary.adminPath", &self.secondary.admin_path),
            ("tertiary.chatPath", &self.tertiary.chat_path),
        ] {
            if !path.starts_with('/') {
                return Err(SettingsError::invalid(key, format!("must start with '/' (got {path:?})")));
            }
        }
        Ok(())
    }
}

/// Reconnect, connect-timeout and request-timeout settings.
///
/// `connect_timeout_ms` defaults to `reconnect_delay_ms`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkTimingSettings {
    /// Constant delay between reconnection attempts.
    pub reconnect_delay_ms: u64,
    /// How long a single attempt may stay connecting.
    pub connect_timeout_ms: u64,
    /// How long a request waits for its response.
    pub request_timeout_ms: u64,
    /// Capacity of each supervisor's command queue.
    pub command_buffer: usize,
}

impl Default for LinkTimingSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: constants::DEFAULT_RECONNECT_DELAY_MS,
            connect_timeout_ms: constants::DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: constants::DEFAULT_REQUEST_TIMEOUT_MS,
            command_buffer: 64,
        }
    }
}

/// Secondary endpoint derivation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecondarySettings {
    /// Host used when the config has none.
    pub default_host: String,
    /// Port used when the config has none.
    pub default_port: u16,
    /// Path appended to `ws://host:port`.
    pub admin_path: String,
}

impl Default for SecondarySettings {
    fn default() -> Self {
        Self {
            default_host: constants::DEFAULT_SECONDARY_HOST.to_string(),
            default_port: constants::DEFAULT_SECONDARY_PORT,
            admin_path: constants::ADMIN_PATH.to_string(),
        }
    }
}

/// Tertiary (push-event) link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TertiarySettings {
    /// Whether the tertiary stage runs at all.
    pub enabled: bool,
    /// Path that replaces the secondary's admin path.
    pub chat_path: String,
}

impl Default for TertiarySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            chat_path: constants::CHAT_PATH.to_string(),
        }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
