//! Pipeline configuration file
//!
//! The file is JSON with one array per component family. Every entry is a
//! flat string map holding `name`, `type`, the channel binding and the
//! component's own settings:
//!
//! ```json
//! {
//!   "sources":  [{"name": "in",   "type": "network", "channel": "disk, mem", "port": "5140"}],
//!   "channels": [{"name": "disk", "type": "durable", "path": "/var/lib/collectord/disk"},
//!                {"name": "mem",  "type": "memory"}],
//!   "sinks":    [{"name": "out",  "type": "network", "channel": "disk",
//!                 "host": "central.example.org", "port": "5140"}]
//! }
//! ```
//!
//! Sources may list several channels separated by commas; sinks bind
//! exactly one. Any structural problem is a `ConfigError` and stops the
//! process before a single component starts.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::{ComponentKind, RegistryError};
use crate::types::{ComponentError, ComponentSettings, CHANNEL_KEY, NAME_KEY, TYPE_KEY};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "COLLECTORD_CONFIG_PATH";

/// Result type for configuration loading and pipeline wiring
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file given (use --conf or {CONFIG_PATH_ENV})")]
    NoLocation,

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} #{index} is missing the '{field}' field")]
    MissingField {
        kind: ComponentKind,
        index: usize,
        field: &'static str,
    },

    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: ComponentKind, name: String },

    #[error("{kind} '{name}' refers to unknown channel '{channel}'")]
    UnknownChannel {
        kind: ComponentKind,
        name: String,
        channel: String,
    },

    #[error("sink '{name}' must bind exactly one channel, got '{channels}'")]
    SinkChannelCount { name: String, channels: String },

    #[error("{kind} '{name}': {source}")]
    Build {
        kind: ComponentKind,
        name: String,
        #[source]
        source: RegistryError,
    },

    #[error("{kind} '{name}' failed to start: {source}")]
    Start {
        kind: ComponentKind,
        name: String,
        #[source]
        source: ComponentError,
    },
}

/// Parsed configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sources: Vec<ComponentSettings>,
    #[serde(default)]
    pub channels: Vec<ComponentSettings>,
    #[serde(default)]
    pub sinks: Vec<ComponentSettings>,
}

impl PipelineConfig {
    /// Read and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that need no component code
    ///
    /// Every entry has a name and a type, names are unique per family,
    /// every binding names a configured channel and each sink binds
    /// exactly one.
    pub fn validate(&self) -> ConfigResult<()> {
        let channel_names = check_entries(ComponentKind::Channel, &self.channels, false)?;
        check_entries(ComponentKind::Source, &self.sources, true)?;
        check_entries(ComponentKind::Sink, &self.sinks, true)?;

        let families = [
            (ComponentKind::Source, &self.sources),
            (ComponentKind::Sink, &self.sinks),
        ];
        for (kind, entries) in families {
            for settings in entries {
                let bound = settings.channel_names();
                if kind == ComponentKind::Sink && bound.len() != 1 {
                    return Err(ConfigError::SinkChannelCount {
                        name: settings.name().to_string(),
                        channels: settings.get(CHANNEL_KEY).unwrap_or_default().to_string(),
                    });
                }
                if let Some(missing) = bound.iter().find(|c| !channel_names.contains(**c)) {
                    return Err(ConfigError::UnknownChannel {
                        kind,
                        name: settings.name().to_string(),
                        channel: missing.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Required fields and unique names for one family; returns the names
fn check_entries(
    kind: ComponentKind,
    entries: &[ComponentSettings],
    needs_channel: bool,
) -> ConfigResult<HashSet<&str>> {
    let mut names = HashSet::new();
    for (index, settings) in entries.iter().enumerate() {
        let missing = |field| ConfigError::MissingField { kind, index, field };

        let name = settings.get(NAME_KEY).ok_or_else(|| missing(NAME_KEY))?;
        settings.get(TYPE_KEY).ok_or_else(|| missing(TYPE_KEY))?;
        if needs_channel && settings.channel_names().is_empty() {
            return Err(missing(CHANNEL_KEY));
        }
        if !names.insert(name) {
            return Err(ConfigError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const VALID: &str = r#"{
        "sources":  [{"name": "in", "type": "network", "channel": "a, b", "port": "5140"}],
        "channels": [{"name": "a", "type": "memory"}, {"name": "b", "type": "memory"}],
        "sinks":    [{"name": "out", "type": "console", "channel": "a"}]
    }"#;

    #[test]
    fn test_valid_config() {
        let config = PipelineConfig::from_json(VALID).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.sources[0].channel_names(), vec!["a", "b"]);
        assert_eq!(config.sinks[0].get("channel"), Some("a"));
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_missing_fields() {
        let no_type = r#"{"channels": [{"name": "a"}]}"#;
        assert!(matches!(
            PipelineConfig::from_json(no_type),
            Err(ConfigError::MissingField { kind: ComponentKind::Channel, field: "type", .. })
        ));

        let no_channel = r#"{"channels": [{"name": "a", "type": "memory"}],
                             "sinks": [{"name": "s", "type": "console"}]}"#;
        assert!(matches!(
            PipelineConfig::from_json(no_channel),
            Err(ConfigError::MissingField { kind: ComponentKind::Sink, field: "channel", .. })
        ));
    }

    #[test]
    fn test_duplicate_names_per_family() {
        let duplicate = r#"{"channels": [{"name": "a", "type": "memory"},
                                         {"name": "a", "type": "durable"}]}"#;
        assert!(matches!(
            PipelineConfig::from_json(duplicate),
            Err(ConfigError::DuplicateName { kind: ComponentKind::Channel, .. })
        ));

        // Different families may share a name.
        let shared = r#"{"channels": [{"name": "x", "type": "memory"}],
                         "sinks": [{"name": "x", "type": "console", "channel": "x"}]}"#;
        assert!(PipelineConfig::from_json(shared).is_ok());
    }

    #[test]
    fn test_dangling_binding() {
        let dangling = r#"{"channels": [{"name": "a", "type": "memory"}],
                           "sources": [{"name": "in", "type": "http", "channel": "a,ghost"}]}"#;
        match PipelineConfig::from_json(dangling) {
            Err(ConfigError::UnknownChannel { name, channel, .. }) => {
                assert_eq!(name, "in");
                assert_eq!(channel, "ghost");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_sink_binds_one_channel() {
        let two = r#"{"channels": [{"name": "a", "type": "memory"}, {"name": "b", "type": "memory"}],
                      "sinks": [{"name": "s", "type": "console", "channel": "a,b"}]}"#;
        assert!(matches!(
            PipelineConfig::from_json(two),
            Err(ConfigError::SinkChannelCount { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.sinks[0].name(), "out");
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            PipelineConfig::load("/nonexistent/collectord.json"),
            Err(ConfigError::Read { .. })
        ));

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            PipelineConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
