//! Built-in component types

use std::sync::Arc;

use super::Registry;
use crate::channel::{Channel, DurableChannel, MemoryChannel};
use crate::sinks::{ConsoleSink, FileSink, NetworkSink, Sink};
use crate::sources::{HttpSource, NetworkSource, Source};

/// Register every component type shipped with the crate
///
/// | kind    | types                                 |
/// |---------|---------------------------------------|
/// | channel | `memory`, `durable`/`sqlite`          |
/// | source  | `network`/`gob`, `http`               |
/// | sink    | `network`/`gob`, `console`, `file`/`legacy` |
///
/// `sqlite`, `gob` and `legacy` are the type names older configuration
/// files use for the same components.
pub fn register_builtins(registry: &mut Registry) {
    registry.register_channel("memory", |s| {
        Ok(Arc::new(MemoryChannel::from_settings(s)?) as Arc<dyn Channel>)
    });
    for durable_type in ["durable", "sqlite"] {
        registry.register_channel(durable_type, |s| {
            Ok(Arc::new(DurableChannel::from_settings(s)?) as Arc<dyn Channel>)
        });
    }

    registry.register_source("http", |s| {
        Ok(Box::new(HttpSource::from_settings(s)?) as Box<dyn Source>)
    });
    for network_type in ["network", "gob"] {
        registry.register_source(network_type, |s| {
            Ok(Box::new(NetworkSource::from_settings(s)?) as Box<dyn Source>)
        });
        registry.register_sink(network_type, |s| {
            Ok(Box::new(NetworkSink::from_settings(s)?) as Box<dyn Sink>)
        });
    }

    registry.register_sink("console", |s| {
        Ok(Box::new(ConsoleSink::from_settings(s)?) as Box<dyn Sink>)
    });
    for file_type in ["file", "legacy"] {
        registry.register_sink(file_type, |s| {
            Ok(Box::new(FileSink::from_settings(s)?) as Box<dyn Sink>)
        });
    }
}
