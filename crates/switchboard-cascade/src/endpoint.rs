//! Endpoint derivation.
//!
//! The secondary endpoint comes from the primary's `get_config` payload:
//!
//! ```text
//! { "status": "success",
//!   "config": { "neuro_sama": { "server_settings": { "host": ..., "port": ... } } } }
//! ```
//!
//! An absent, empty or zero host/port falls back to the configured default.
//! The tertiary endpoint is the secondary endpoint with the admin path
//! replaced by the chat path.

use serde_json::Value;
use switchboard_core::CascadeError;
use switchboard_core::constants;
use switchboard_settings::SwitchboardSettings;

/// Pointer to the secondary's server settings inside the config.
const SERVER_SETTINGS_POINTER: &str = "/neuro_sama/server_settings";

/// Dotted name of the same section, for errors.
const SERVER_SETTINGS_PATH: &str = "neuro_sama.server_settings";

/// Defaults and path conventions for derived endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointRules {
    /// Host used when the config has none.
    pub default_host: String,
    /// Port used when the config has none.
    pub default_port: u16,
    /// Path of an admin endpoint.
    pub admin_path: String,
    /// Path of the push-event endpoint.
    pub chat_path: String,
}

impl Default for EndpointRules {
    fn default() -> Self {
        Self {
            default_host: constants::DEFAULT_SECONDARY_HOST.to_string(),
            default_port: constants::DEFAULT_SECONDARY_PORT,
            admin_path: constants::ADMIN_PATH.to_string(),
            chat_path: constants::CHAT_PATH.to_string(),
        }
    }
}

impl EndpointRules {
    /// Rules from loaded settings.
    pub fn from_settings(settings: &SwitchboardSettings) -> Self {
        Self {
            default_host: settings.secondary.default_host.clone(),
            default_port: settings.secondary.default_port,
            admin_path: settings.secondary.admin_path.clone(),
            chat_path: settings.tertiary.chat_path.clone(),
        }
    }
}

/// A successfully fetched config and the secondary endpoint it names.
#[derive(Clone, Debug, PartialEq)]
pub struct SecondaryTarget {
    /// `ws://{host}:{port}{admin_path}`.
    pub url: String,
    /// The `config` object of the payload.
    pub config: Value,
}

/// Derive the secondary endpoint from a `get_config` response payload.
pub fn secondary_endpoint(
    payload: &Value,
    rules: &EndpointRules,
) -> Result<SecondaryTarget, CascadeError> {
    if payload.get("status").and_then(Value::as_str) != Some("success") {
        let message = match payload.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "no message".to_string(),
            Some(other) => other.to_string(),
        };
        return Err(CascadeError::ConfigRejected { message });
    }

    let config = payload.get("config").cloned().unwrap_or(Value::Null);
    let settings = config
        .pointer(SERVER_SETTINGS_POINTER)
        .filter(|v| is_present(v))
        .ok_or_else(|| CascadeError::ConfigIncomplete {
            missing: SERVER_SETTINGS_PATH.to_string(),
        })?;

    let host = settings
        .get("host")
        .and_then(scalar_text)
        .unwrap_or_else(|| rules.default_host.clone());
    let port = settings
        .get("port")
        .and_then(scalar_text)
        .unwrap_or_else(|| rules.default_port.to_string());

    Ok(SecondaryTarget {
        url: format!("ws://{host}:{port}{}", rules.admin_path),
        config,
    })
}

/// Derive the tertiary endpoint from the secondary endpoint.
///
/// Replaces the first occurrence of the admin path. `None` when the
/// secondary endpoint does not contain it.
pub fn tertiary_endpoint(secondary_url: &str, rules: &EndpointRules) -> Option<String> {
    secondary_url
        .contains(rules.admin_path.as_str())
        .then(|| secondary_url.replacen(rules.admin_path.as_str(), &rules.chat_path, 1))
}

/// A non-empty string, non-zero number or `true`, as URL text.
///
/// Empty, zero, `false`, `null` and containers yield `None` so the default
/// applies.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

/// Anything but `null` and `false` counts as a present section.
fn is_present(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}
