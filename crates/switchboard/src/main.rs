//! # switchboard
//!
//! Switchboard binary. Loads settings, starts the link cascade and prints
//! push events from the tertiary link as JSON lines on stdout.

#![deny(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use switchboard_cascade::{CascadeConfig, CascadeHandle, Orchestrator, Stage};
use switchboard_link::WsConnector;
use switchboard_settings::SwitchboardSettings;

/// Switchboard link cascade.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "Cascading WebSocket link manager")]
struct Cli {
    /// Settings file (defaults to `~/.switchboard/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Primary endpoint (overrides settings).
    #[arg(long)]
    primary_url: Option<String>,

    /// Log filter directive (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Do not connect the push-event link.
    #[arg(long)]
    no_tertiary: bool,
}

impl Cli {
    /// Settings from file and environment, then command-line overrides.
    fn resolve_settings(&self) -> Result<SwitchboardSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(switchboard_settings::settings_path);
        let mut settings = switchboard_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(url) = &self.primary_url {
            settings.primary_url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.no_tertiary {
            settings.tertiary.enabled = false;
        }
        settings.validate().context("Invalid command-line override")?;
        Ok(settings)
    }
}

/// Write one push event as a JSON line.
fn print_event(event: &Value) {
    let mut out = std::io::stdout().lock();
    if writeln!(out, "{event}").is_err() {
        tracing::warn!("stdout closed, dropping event");
    }
}

/// Log every snapshot change of every link until the cascade stops.
fn watch_links(cascade: &CascadeHandle) {
    for stage in Stage::ALL {
        let mut rx = cascade.link(stage).subscribe();
        let _ = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                tracing::info!(
                    stage = %stage,
                    state = %snapshot.state,
                    endpoint = snapshot.endpoint.as_deref().unwrap_or("-"),
                    reconnect_attempts = snapshot.reconnect_attempts,
                    reconnect_pending = snapshot.reconnect_pending,
                    "link changed"
                );
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.resolve_settings()?;

    switchboard_core::logging::init_subscriber(&settings.logging.level);
    tracing::info!(
        primary_url = %settings.primary_url,
        tertiary = settings.tertiary.enabled,
        "switchboard starting"
    );

    let cascade = Orchestrator::spawn(CascadeConfig::from_settings(&settings), Arc::new(WsConnector));
    cascade.set_event_handler(|event| print_event(&event));
    watch_links(&cascade);
    cascade.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    cascade.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("switchboard").chain(args.iter().copied()))
    }

    fn settings_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_flags() {
        let args = cli(&[
            "--settings",
            "/tmp/s.json",
            "--primary-url",
            "ws://h:1/ws/admin",
            "--log-level",
            "debug",
            "--no-tertiary",
        ]);
        assert_eq!(args.settings, Some(PathBuf::from("/tmp/s.json")));
        assert_eq!(args.primary_url.as_deref(), Some("ws://h:1/ws/admin"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.no_tertiary);
    }

    #[test]
    fn defaults_without_flags() {
        let args = cli(&[]);
        assert!(args.settings.is_none());
        assert!(args.primary_url.is_none());
        assert!(!args.no_tertiary);
    }

    #[test]
    fn flags_override_file() {
        let file = settings_file(r#"{"primaryUrl": "ws://file:1/ws/admin", "logging": {"level": "warn"}}"#);
        let path = file.path().to_str().unwrap();

        let settings = cli(&["--settings", path]).resolve_settings().unwrap();
        assert_eq!(settings.primary_url, "ws://file:1/ws/admin");
        assert!(settings.tertiary.enabled);

        let settings = cli(&["--settings", path, "--primary-url", "ws://cli:2/ws/admin", "--no-tertiary"])
            .resolve_settings()
            .unwrap();
        assert_eq!(settings.primary_url, "ws://cli:2/ws/admin");
        assert!(!settings.tertiary.enabled);
    }

    #[test]
    fn empty_primary_url_flag_is_rejected() {
        let file = settings_file("{}");
        let path = file.path().to_str().unwrap();
        assert!(cli(&["--settings", path, "--primary-url", ""]).resolve_settings().is_err());
    }

    #[test]
    fn invalid_settings_file_is_an_error() {
        let file = settings_file("{not json");
        let path = file.path().to_str().unwrap();
        let err = cli(&["--settings", path]).resolve_settings().unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }
}
