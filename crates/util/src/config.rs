//! Telemetry settings.
//!
//! Settings come from a small JSON file (by default
//! `~/.config/bpmndt/bpmndt.json` on most platforms, overridable through
//! [`CONFIG_PATH_ENV`]) and are then overridden by environment variables. A
//! missing file yields defaults; a malformed file is reported and ignored.
//! Environment values that do not parse are errors.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use dirs_next::{config_dir, home_dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::transport::{DEFAULT_SEND_TIMEOUT, ListenerAddress};

pub const CONFIG_PATH_ENV: &str = "BPMNDT_CONFIG_PATH";
pub const LISTENER_HOST_ENV: &str = "BPMNDT_LISTENER_HOST";
pub const LISTENER_PORT_ENV: &str = "BPMNDT_LISTENER_PORT";
pub const SEND_TIMEOUT_ENV: &str = "BPMNDT_SEND_TIMEOUT_MS";

pub const CONFIG_FILE_NAME: &str = "bpmndt.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid value '{value}' for {variable}")]
    InvalidValue { variable: &'static str, value: String },
}

/// Where and how run telemetry is delivered.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub listener_host: Option<String>,
    pub listener_port: Option<u16>,
    pub send_timeout_ms: Option<u64>,
}

impl TelemetrySettings {
    /// Loads settings from the default path and applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&default_config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut settings = read_settings_file(path)?;
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    /// Overrides fields with the values of the `BPMNDT_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(host) = non_empty_var(LISTENER_HOST_ENV) {
            self.listener_host = Some(host);
        }
        if let Some(port) = non_empty_var(LISTENER_PORT_ENV) {
            self.listener_port = Some(parse_var(LISTENER_PORT_ENV, &port)?);
        }
        if let Some(timeout) = non_empty_var(SEND_TIMEOUT_ENV) {
            let millis: u64 = parse_var(SEND_TIMEOUT_ENV, &timeout)?;
            if millis == 0 {
                return Err(ConfigError::InvalidValue {
                    variable: SEND_TIMEOUT_ENV,
                    value: timeout,
                });
            }
            self.send_timeout_ms = Some(millis);
        }
        Ok(())
    }

    /// Listener to send telemetry to; present only when a host is set and the port is positive.
    pub fn listener_address(&self) -> Option<ListenerAddress> {
        let host = self.listener_host.as_deref().map(str::trim).filter(|host| !host.is_empty())?;
        let port = self.listener_port.filter(|port| *port > 0)?;
        Some(ListenerAddress::new(host, port))
    }

    /// Per-step network timeout; a zero value falls back to the default.
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout_ms
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SEND_TIMEOUT)
    }
}

/// Resolves the settings file path, honouring [`CONFIG_PATH_ENV`].
pub fn default_config_path() -> PathBuf {
    if let Some(path) = non_empty_var(CONFIG_PATH_ENV) {
        return expand_home(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bpmndt")
        .join(CONFIG_FILE_NAME)
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let rest = match trimmed {
        "~" => "",
        _ => match trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
            Some(rest) => rest,
            None => return PathBuf::from(trimmed),
        },
    };

    match home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(trimmed),
    }
}

fn read_settings_file(path: &Path) -> Result<TelemetrySettings, ConfigError> {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(settings) => Ok(settings),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to parse settings file; using defaults");
                Ok(TelemetrySettings::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(TelemetrySettings::default()),
        Err(error) => Err(ConfigError::Io(error)),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_var<T: std::str::FromStr>(variable: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        variable,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const NO_OVERRIDES: [(&str, Option<&str>); 3] = [(LISTENER_HOST_ENV, None), (LISTENER_PORT_ENV, None), (SEND_TIMEOUT_ENV, None)];

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        temp_env::with_vars(NO_OVERRIDES, || {
            let settings = TelemetrySettings::load_from(&dir.path().join("absent.json")).unwrap();
            assert_eq!(settings, TelemetrySettings::default());
            assert_eq!(settings.listener_address(), None);
            assert_eq!(settings.send_timeout(), DEFAULT_SEND_TIMEOUT);
        });
    }

    #[test]
    fn file_values_are_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{"listener_host":"localhost","listener_port":8001,"send_timeout_ms":250}"#).unwrap();

        temp_env::with_vars(NO_OVERRIDES, || {
            let settings = TelemetrySettings::load_from(&path).unwrap();
            assert_eq!(settings.listener_address(), Some(ListenerAddress::new("localhost", 8001)));
            assert_eq!(settings.send_timeout(), Duration::from_millis(250));
        });
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{"listener_host":"localhost","listener_port":8001}"#).unwrap();

        temp_env::with_vars(
            [
                (LISTENER_HOST_ENV, Some("telemetry.internal")),
                (LISTENER_PORT_ENV, Some("9000")),
                (SEND_TIMEOUT_ENV, None),
            ],
            || {
                let settings = TelemetrySettings::load_from(&path).unwrap();
                assert_eq!(settings.listener_address(), Some(ListenerAddress::new("telemetry.internal", 9000)));
            },
        );
    }

    #[test]
    fn invalid_port_is_rejected() {
        let dir = tempdir().unwrap();
        temp_env::with_vars(
            [
                (LISTENER_HOST_ENV, Some("localhost")),
                (LISTENER_PORT_ENV, Some("eighty")),
                (SEND_TIMEOUT_ENV, None),
            ],
            || {
                let error = TelemetrySettings::load_from(&dir.path().join("absent.json")).unwrap_err();
                assert!(matches!(error, ConfigError::InvalidValue { variable: LISTENER_PORT_ENV, .. }));
            },
        );
    }

    #[test]
    fn zero_send_timeout_is_rejected() {
        let dir = tempdir().unwrap();
        temp_env::with_vars(
            [(LISTENER_HOST_ENV, None), (LISTENER_PORT_ENV, None), (SEND_TIMEOUT_ENV, Some("0"))],
            || {
                let error = TelemetrySettings::load_from(&dir.path().join("absent.json")).unwrap_err();
                assert!(matches!(error, ConfigError::InvalidValue { variable: SEND_TIMEOUT_ENV, ref value } if value == "0"));
            },
        );
    }

    #[test]
    fn zero_send_timeout_in_file_uses_the_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{"send_timeout_ms":0}"#).unwrap();

        temp_env::with_vars(NO_OVERRIDES, || {
            assert_eq!(TelemetrySettings::load_from(&path).unwrap().send_timeout(), DEFAULT_SEND_TIMEOUT);
        });
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "not json").unwrap();

        temp_env::with_vars(NO_OVERRIDES, || {
            assert_eq!(TelemetrySettings::load_from(&path).unwrap(), TelemetrySettings::default());
        });
    }

    #[test]
    fn zero_port_disables_the_listener() {
        let settings = TelemetrySettings {
            listener_host: Some("localhost".into()),
            listener_port: Some(0),
            send_timeout_ms: None,
        };
        assert_eq!(settings.listener_address(), None);
    }

    #[test]
    fn config_path_honours_env_override() {
        temp_env::with_var(CONFIG_PATH_ENV, Some("~/custom/bpmndt.json"), || {
            assert_eq!(default_config_path(), expand_home("~/custom/bpmndt.json"));
        });
        assert_eq!(expand_home("/etc/bpmndt.json"), PathBuf::from("/etc/bpmndt.json"));
    }
}
