//! Per-component settings
//!
//! Every component is built from a flat string map. The map is the raw
//! configuration entry, so it also carries the `name`, `type` and
//! `channel` keys that the pipeline uses for wiring.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ComponentError, ComponentResult};

/// Key holding the component's unique name
pub const NAME_KEY: &str = "name";
/// Key holding the registered type name
pub const TYPE_KEY: &str = "type";
/// Key holding the bound channel name(s)
pub const CHANNEL_KEY: &str = "channel";

/// Immutable option map handed to a component factory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentSettings {
    values: HashMap<String, String>,
}

impl ComponentSettings {
    /// Empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion, mostly for tests and programmatic wiring
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Component name used in log lines and error messages
    pub fn name(&self) -> &str {
        self.get(NAME_KEY).unwrap_or("<unnamed>")
    }

    /// Registered type name, if present
    pub fn component_type(&self) -> Option<&str> {
        self.get(TYPE_KEY)
    }

    /// Channel names listed under `channel`, comma separated
    pub fn channel_names(&self) -> Vec<&str> {
        self.get(CHANNEL_KEY)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Raw value; empty strings count as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Raw value or a fallback
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Value that must be present
    pub fn require(&self, key: &str) -> ComponentResult<&str> {
        self.get(key).ok_or_else(|| ComponentError::MissingSetting {
            component: self.name().to_string(),
            setting: key.to_string(),
        })
    }

    /// First present key out of several aliases
    pub fn require_any(&self, keys: &[&str]) -> ComponentResult<&str> {
        keys.iter()
            .find_map(|k| self.get(k))
            .ok_or_else(|| ComponentError::MissingSetting {
                component: self.name().to_string(),
                setting: keys.join("|"),
            })
    }

    /// Required value parsed into `T`
    pub fn require_parsed<T>(&self, key: &str) -> ComponentResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.require(key)?;
        self.parse_value(key, raw)
    }

    /// Optional value parsed into `T`, `default` when absent
    pub fn parse_or<T>(&self, key: &str, default: T) -> ComponentResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => self.parse_value(key, raw),
            None => Ok(default),
        }
    }

    /// Optional millisecond value as a `Duration`
    pub fn millis_or(&self, key: &str, default: Duration) -> ComponentResult<Duration> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        let ms: u64 = self.parse_or(key, default_ms)?;
        if ms == 0 {
            return Err(self.invalid(key, "0", "must be greater than zero"));
        }
        Ok(Duration::from_millis(ms))
    }

    /// Optional whole-second value as a `Duration`
    pub fn secs_or(&self, key: &str, default: Duration) -> ComponentResult<Duration> {
        let secs: u64 = self.parse_or(key, default.as_secs())?;
        if secs == 0 {
            return Err(self.invalid(key, "0", "must be greater than zero"));
        }
        Ok(Duration::from_secs(secs))
    }

    /// Iterate over all key/value pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn parse_value<T>(&self, key: &str, raw: &str) -> ComponentResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        raw.trim()
            .parse()
            .map_err(|e: T::Err| self.invalid(key, raw, &e.to_string()))
    }

    fn invalid(&self, key: &str, value: &str, reason: &str) -> ComponentError {
        ComponentError::InvalidSetting {
            component: self.name().to_string(),
            setting: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<HashMap<String, String>> for ComponentSettings {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl<K, V> FromIterator<(K, V)> for ComponentSettings
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
