//! `trust-link.toml` loading.

#![allow(missing_docs)]

use std::path::Path;
use std::time::Duration;

use indexmap::IndexSet;
use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::LinkError;
use crate::hub::HubSettings;
use crate::protocol::DEFAULT_PORT;
use crate::registry::ControllerId;
use crate::telemetry::DEFAULT_HISTORY_LIMIT;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub connect_timeout: Duration,
    pub history_limit: usize,
    pub default_port: u16,
    pub poll_interval: Duration,
    pub log_level: SmolStr,
    pub controllers: Vec<ControllerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub id: ControllerId,
    pub name: SmolStr,
    pub address: SmolStr,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            history_limit: DEFAULT_HISTORY_LIMIT,
            default_port: DEFAULT_PORT,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            log_level: SmolStr::new("info"),
            controllers: Vec::new(),
        }
    }
}

impl LinkConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            LinkError::InvalidConfig(format!("{}: {err}", path.display()).into())
        })?;
        Self::from_toml(&text).map_err(|err| match err {
            LinkError::InvalidConfig(reason) => {
                LinkError::InvalidConfig(format!("{}: {reason}", path.display()).into())
            }
            other => other,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, LinkError> {
        let raw: LinkToml =
            toml::from_str(text).map_err(|err| LinkError::InvalidConfig(err.to_string().into()))?;
        raw.into_config()
    }

    #[must_use]
    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            connect_timeout: self.connect_timeout,
            history_limit: self.history_limit,
        }
    }

    /// Apply command-line overrides, re-checking the same bounds as the file.
    pub fn with_overrides(
        mut self,
        timeout_ms: Option<u64>,
        history: Option<usize>,
    ) -> Result<Self, LinkError> {
        if let Some(timeout_ms) = timeout_ms {
            if timeout_ms == 0 {
                return Err(LinkError::InvalidConfig(
                    "connect timeout must be greater than zero".into(),
                ));
            }
            self.connect_timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(history) = history {
            if history == 0 {
                return Err(LinkError::InvalidConfig(
                    "history limit must be greater than zero".into(),
                ));
            }
            self.history_limit = history;
        }
        Ok(self)
    }
}

#[derive(Debug, Default, Deserialize)]
struct LinkToml {
    #[serde(default)]
    link: LinkSection,
    #[serde(default)]
    controllers: Vec<ControllerSection>,
}

#[derive(Debug, Default, Deserialize)]
struct LinkSection {
    connect_timeout_ms: Option<u64>,
    history_limit: Option<usize>,
    default_port: Option<u16>,
    poll_interval_ms: Option<u64>,
    log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ControllerSection {
    id: String,
    name: Option<String>,
    address: String,
}

impl LinkToml {
    fn into_config(self) -> Result<LinkConfig, LinkError> {
        let defaults = LinkConfig::default();
        let link = self.link;

        let connect_timeout_ms = link
            .connect_timeout_ms
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
        if connect_timeout_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "link.connect_timeout_ms must be greater than zero".into(),
            ));
        }
        let history_limit = link.history_limit.unwrap_or(defaults.history_limit);
        if history_limit == 0 {
            return Err(LinkError::InvalidConfig(
                "link.history_limit must be greater than zero".into(),
            ));
        }
        let default_port = link.default_port.unwrap_or(defaults.default_port);
        if default_port == 0 {
            return Err(LinkError::InvalidConfig(
                "link.default_port must be greater than zero".into(),
            ));
        }
        let poll_interval_ms = link.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if poll_interval_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "link.poll_interval_ms must be greater than zero".into(),
            ));
        }
        let log_level = match link.log_level {
            Some(level) => {
                let level = level.trim().to_ascii_lowercase();
                if !LOG_LEVELS.contains(&level.as_str()) {
                    return Err(LinkError::InvalidConfig(
                        format!("link.log_level '{level}' is not one of {LOG_LEVELS:?}").into(),
                    ));
                }
                SmolStr::new(level)
            }
            None => defaults.log_level,
        };

        let mut seen = IndexSet::new();
        let mut controllers = Vec::with_capacity(self.controllers.len());
        for section in self.controllers {
            let id = section.id.trim();
            if id.is_empty() {
                return Err(LinkError::InvalidConfig(
                    "controllers.id must not be empty".into(),
                ));
            }
            if !seen.insert(id.to_string()) {
                return Err(LinkError::InvalidConfig(
                    format!("duplicate controller id '{id}'").into(),
                ));
            }
            let address = section.address.trim();
            if address.is_empty() {
                return Err(LinkError::InvalidConfig(
                    format!("controller '{id}' has an empty address").into(),
                ));
            }
            let name = section
                .name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(id);
            controllers.push(ControllerConfig {
                id: ControllerId::new(id),
                name: SmolStr::new(name),
                address: SmolStr::new(address),
            });
        }

        Ok(LinkConfig {
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            history_limit,
            default_port,
            poll_interval: Duration::from_millis(poll_interval_ms),
            log_level,
            controllers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = LinkConfig::from_toml("").unwrap();
        assert_eq!(config, LinkConfig::default());
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.history_limit, 100);
        assert_eq!(config.default_port, 4444);
    }

    #[test]
    fn parses_link_section_and_controllers() {
        let config = LinkConfig::from_toml(
            r#"
[link]
connect_timeout_ms = 1500
history_limit = 20
log_level = "DEBUG"

[[controllers]]
id = "A"
name = "Line 1"
address = "10.0.0.5"

[[controllers]]
id = "B"
address = "ws://10.0.0.6:4500"
"#,
        )
        .unwrap();
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.controllers.len(), 2);
        assert_eq!(config.controllers[0].name, "Line 1");
        assert_eq!(config.controllers[1].name, "B");
        assert_eq!(config.hub_settings().history_limit, 20);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = LinkConfig::from_toml(
            r#"
[[controllers]]
id = "A"
address = "10.0.0.5"

[[controllers]]
id = "A"
address = "10.0.0.6"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, LinkError::InvalidConfig(reason) if reason.contains("duplicate")));
    }

    #[test]
    fn rejects_invalid_values() {
        for text in [
            "[link]\nconnect_timeout_ms = 0",
            "[link]\nhistory_limit = 0",
            "[link]\nlog_level = \"loud\"",
            "[[controllers]]\nid = \"\"\naddress = \"x\"",
            "[[controllers]]\nid = \"A\"\naddress = \" \"",
        ] {
            assert!(
                matches!(LinkConfig::from_toml(text), Err(LinkError::InvalidConfig(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn overrides_replace_file_values() {
        let config = LinkConfig::default()
            .with_overrides(Some(250), Some(5))
            .unwrap();
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.history_limit, 5);
        assert!(LinkConfig::default().with_overrides(Some(0), None).is_err());
    }
}
