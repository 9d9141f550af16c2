//! Component factories by type name
//!
//! A `Registry` maps the `type` value of a configuration entry to the
//! function that builds the component. It is an ordinary value: the
//! binary fills one with the built-in types and hands it to the pipeline,
//! tests can build their own.

mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::channel::Channel;
use crate::sinks::Sink;
use crate::sources::Source;
use crate::types::{ComponentError, ComponentResult, ComponentSettings};

pub use builtin::register_builtins;

/// Builds a channel from its settings
pub type ChannelFactory =
    Box<dyn Fn(&ComponentSettings) -> ComponentResult<Arc<dyn Channel>> + Send + Sync>;
/// Builds a source from its settings
pub type SourceFactory =
    Box<dyn Fn(&ComponentSettings) -> ComponentResult<Box<dyn Source>> + Send + Sync>;
/// Builds a sink from its settings
pub type SinkFactory =
    Box<dyn Fn(&ComponentSettings) -> ComponentResult<Box<dyn Sink>> + Send + Sync>;

/// The three component families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Source,
    Channel,
    Sink,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Source => write!(f, "source"),
            ComponentKind::Channel => write!(f, "channel"),
            ComponentKind::Sink => write!(f, "sink"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown {kind} type '{type_name}'")]
    UnknownType {
        kind: ComponentKind,
        type_name: String,
    },

    #[error(transparent)]
    Component(#[from] ComponentError),
}

/// Explicit type-name → factory tables
#[derive(Default)]
pub struct Registry {
    channels: HashMap<String, ChannelFactory>,
    sources: HashMap<String, SourceFactory>,
    sinks: HashMap<String, SinkFactory>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in component type
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    /// Register a channel type; a later registration replaces an earlier one
    pub fn register_channel<F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ComponentSettings) -> ComponentResult<Arc<dyn Channel>> + Send + Sync + 'static,
    {
        self.channels.insert(type_name.into(), Box::new(factory));
        self
    }

    /// Register a source type
    pub fn register_source<F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ComponentSettings) -> ComponentResult<Box<dyn Source>> + Send + Sync + 'static,
    {
        self.sources.insert(type_name.into(), Box::new(factory));
        self
    }

    /// Register a sink type
    pub fn register_sink<F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ComponentSettings) -> ComponentResult<Box<dyn Sink>> + Send + Sync + 'static,
    {
        self.sinks.insert(type_name.into(), Box::new(factory));
        self
    }

    pub fn build_channel(
        &self,
        type_name: &str,
        settings: &ComponentSettings,
    ) -> Result<Arc<dyn Channel>, RegistryError> {
        let factory = self
            .channels
            .get(type_name)
            .ok_or_else(|| unknown(ComponentKind::Channel, type_name))?;
        Ok(factory(settings)?)
    }

    pub fn build_source(
        &self,
        type_name: &str,
        settings: &ComponentSettings,
    ) -> Result<Box<dyn Source>, RegistryError> {
        let factory = self
            .sources
            .get(type_name)
            .ok_or_else(|| unknown(ComponentKind::Source, type_name))?;
        Ok(factory(settings)?)
    }

    pub fn build_sink(
        &self,
        type_name: &str,
        settings: &ComponentSettings,
    ) -> Result<Box<dyn Sink>, RegistryError> {
        let factory = self
            .sinks
            .get(type_name)
            .ok_or_else(|| unknown(ComponentKind::Sink, type_name))?;
        Ok(factory(settings)?)
    }

    /// Registered type names of one family, sorted
    pub fn type_names(&self, kind: ComponentKind) -> Vec<&str> {
        let mut names: Vec<&str> = match kind {
            ComponentKind::Channel => self.channels.keys().map(String::as_str).collect(),
            ComponentKind::Source => self.sources.keys().map(String::as_str).collect(),
            ComponentKind::Sink => self.sinks.keys().map(String::as_str).collect(),
        };
        names.sort_unstable();
        names
    }
}

fn unknown(kind: ComponentKind, type_name: &str) -> RegistryError {
    RegistryError::UnknownType {
        kind,
        type_name: type_name.to_string(),
    }
}
