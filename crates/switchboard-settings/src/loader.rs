//! Layered settings loading.
//!
//! `defaults → settings file → SWITCHBOARD_* env vars → validate`.
//!
//! The file only needs the keys it changes: it is deep-merged over the
//! serialized defaults before being decoded, so nested sections keep their
//! unmentioned fields. A `null` in the file means "keep the default".

use std::io::ErrorKind;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::SwitchboardSettings;

/// Accepted range for every `*_MS` env var.
const MS_RANGE: RangeInclusive<u64> = 1..=3_600_000;

/// `~/.switchboard/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    home.join(".switchboard").join("settings.json")
}

/// [`load_settings_from_path`] on [`settings_path`].
pub fn load_settings() -> Result<SwitchboardSettings> {
    load_settings_from_path(&settings_path())
}

/// Defaults, then the file at `path` (if any), then env overrides, validated.
pub fn load_settings_from_path(path: &Path) -> Result<SwitchboardSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`. A missing file is not an error.
pub fn read_settings_file(path: &Path) -> Result<SwitchboardSettings> {
    let parse_err = |source| SettingsError::Parse {
        path: path.to_owned(),
        source,
    };
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(SwitchboardSettings::default());
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_owned(),
                source,
            });
        }
    };
    debug!(path = %path.display(), "loading settings file");

    let overrides: Value = serde_json::from_str(&content).map_err(parse_err)?;
    let defaults = serde_json::to_value(SwitchboardSettings::default()).map_err(parse_err)?;
    serde_json::from_value(deep_merge(defaults, overrides)).map_err(parse_err)
}

/// Merge `overlay` into `base`.
///
/// Objects merge key by key; any other overlay value replaces the base value
/// outright. `null` overlay values are skipped.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Apply `SWITCHBOARD_*` overrides from the process environment.
///
/// Empty or unparsable values are ignored (with a warning for the latter).
pub fn apply_env_overrides(settings: &mut SwitchboardSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides, reading each variable through `lookup`.
pub fn apply_overrides_from(
    settings: &mut SwitchboardSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let env = Env { lookup };

    if let Some(url) = env.text("SWITCHBOARD_PRIMARY_URL") {
        settings.primary_url = url;
    }
    if let Some(host) = env.text("SWITCHBOARD_SECONDARY_HOST") {
        settings.secondary.default_host = host;
    }
    env.parsed("SWITCHBOARD_SECONDARY_PORT", &mut settings.secondary.default_port, |v| {
        parse_in_range(v, 1..=u16::MAX)
    });
    env.parsed("SWITCHBOARD_TERTIARY", &mut settings.tertiary.enabled, parse_bool);

    let links = &mut settings.links;
    for (name, slot) in [
        ("SWITCHBOARD_RECONNECT_DELAY_MS", &mut links.reconnect_delay_ms),
        ("SWITCHBOARD_CONNECT_TIMEOUT_MS", &mut links.connect_timeout_ms),
        ("SWITCHBOARD_REQUEST_TIMEOUT_MS", &mut links.request_timeout_ms),
    ] {
        env.parsed(name, slot, |v| parse_in_range(v, MS_RANGE));
    }

    if let Some(level) = env.text("SWITCHBOARD_LOG_LEVEL") {
        settings.logging.level = level;
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn text(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    /// Overwrite `slot` when `name` is set and parses.
    fn parsed<T>(&self, name: &str, slot: &mut T, parse: impl Fn(&str) -> Option<T>) {
        let Some(raw) = self.text(name) else { return };
        match parse(&raw) {
            Some(value) => *slot = value,
            None => warn!(var = name, value = %raw, "ignoring invalid env override"),
        }
    }
}

/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    const TRUE: [&str; 4] = ["true", "1", "yes", "on"];
    const FALSE: [&str; 4] = ["false", "0", "no", "off"];
    let val = val.trim();
    if TRUE.iter().any(|t| val.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if FALSE.iter().any(|f| val.eq_ignore_ascii_case(f)) {
        Some(false)
    } else {
        None
    }
}

/// A number inside `range`.
pub fn parse_in_range<T>(val: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn write_settings(json: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, json).unwrap();
        (dir, path)
    }

    #[test]
    fn merge_keeps_sibling_keys() {
        let merged = deep_merge(
            json!({"links": {"reconnectDelayMs": 5000, "requestTimeoutMs": 10000}, "primaryUrl": "a"}),
            json!({"links": {"reconnectDelayMs": 250}}),
        );
        assert_eq!(
            merged,
            json!({"links": {"reconnectDelayMs": 250, "requestTimeoutMs": 10000}, "primaryUrl": "a"})
        );
    }

    #[test]
    fn merge_null_and_scalars() {
        let merged = deep_merge(
            json!({"tertiary": {"enabled": true}, "secondary": {"defaultPort": 8001}}),
            json!({"tertiary": null, "secondary": 7}),
        );
        assert_eq!(merged["tertiary"]["enabled"], true);
        assert_eq!(merged["secondary"], 7);
    }

    #[test]
    fn missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_settings_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, SwitchboardSettings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let (_dir, path) = write_settings(
            r#"{"primaryUrl": "ws://10.0.0.2:8000/ws/admin", "links": {"reconnectDelayMs": 250}, "tertiary": {"enabled": false}}"#,
        );
        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.primary_url, "ws://10.0.0.2:8000/ws/admin");
        assert_eq!(settings.links.reconnect_delay_ms, 250);
        assert_eq!(settings.links.connect_timeout_ms, 5_000);
        assert!(!settings.tertiary.enabled);
        assert_eq!(settings.tertiary.chat_path, "/ws/chat");
    }

    #[test]
    fn malformed_or_mistyped_file_is_parse_error() {
        for body in ["{not json", r#"{"links": {"reconnectDelayMs": "soon"}}"#] {
            let (_dir, path) = write_settings(body);
            assert_matches!(
                read_settings_file(&path),
                Err(SettingsError::Parse { path: p, .. }) if p == path
            );
        }
    }

    #[test]
    fn directory_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(read_settings_file(dir.path()), Err(SettingsError::Read { .. }));
    }

    #[test]
    fn invalid_value_fails_load() {
        let (_dir, path) = write_settings(r#"{"links": {"requestTimeoutMs": 0}}"#);
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Invalid { key: "links.requestTimeoutMs", .. })
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = SwitchboardSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("SWITCHBOARD_PRIMARY_URL", "ws://vedal:8000/ws/admin"),
                ("SWITCHBOARD_SECONDARY_HOST", "10.0.0.9"),
                ("SWITCHBOARD_SECONDARY_PORT", "9001"),
                ("SWITCHBOARD_TERTIARY", "off"),
                ("SWITCHBOARD_RECONNECT_DELAY_MS", "1500"),
                ("SWITCHBOARD_REQUEST_TIMEOUT_MS", "30000"),
                ("SWITCHBOARD_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.primary_url, "ws://vedal:8000/ws/admin");
        assert_eq!(settings.secondary.default_host, "10.0.0.9");
        assert_eq!(settings.secondary.default_port, 9001);
        assert!(!settings.tertiary.enabled);
        assert_eq!(settings.links.reconnect_delay_ms, 1500);
        assert_eq!(settings.links.connect_timeout_ms, 5_000);
        assert_eq!(settings.links.request_timeout_ms, 30_000);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = SwitchboardSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("SWITCHBOARD_SECONDARY_PORT", "0"),
                ("SWITCHBOARD_TERTIARY", "maybe"),
                ("SWITCHBOARD_RECONNECT_DELAY_MS", "soon"),
                ("SWITCHBOARD_CONNECT_TIMEOUT_MS", "3600001"),
                ("SWITCHBOARD_PRIMARY_URL", ""),
            ]),
        );
        assert_eq!(settings, SwitchboardSettings::default());
    }

    #[test]
    fn bools() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool(" on "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("OFF"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn ranges() {
        assert_eq!(parse_in_range("8001", 1..=u16::MAX), Some(8001_u16));
        assert_eq!(parse_in_range::<u16>("0", 1..=u16::MAX), None);
        assert_eq!(parse_in_range::<u16>("99999", 1..=u16::MAX), None);
        assert_eq!(parse_in_range("5000", MS_RANGE), Some(5000));
        assert_eq!(parse_in_range("abc", MS_RANGE), None);
    }
}
