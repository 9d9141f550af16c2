//! Composition root
//!
//! Turns a validated `PipelineConfig` into running components: channels
//! are built first, then sources and sinks are built and bound to them by
//! name. Every background task shares one `CancellationToken`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::Channel;
use crate::config::{ConfigError, ConfigResult, PipelineConfig};
use crate::registry::{ComponentKind, Registry};
use crate::sinks::Sink;
use crate::sources::Source;
use crate::types::{ComponentSettings, TYPE_KEY};

pub struct Pipeline {
    channels: HashMap<String, Arc<dyn Channel>>,
    sources: Vec<Box<dyn Source>>,
    sinks: Vec<Box<dyn Sink>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Build and wire every configured component; nothing is started
    pub fn build(config: &PipelineConfig, registry: &Registry) -> ConfigResult<Self> {
        config.validate()?;

        let mut channels = HashMap::new();
        for settings in &config.channels {
            let channel = registry
                .build_channel(type_of(settings), settings)
                .map_err(|source| build_error(ComponentKind::Channel, settings, source))?;
            channels.insert(settings.name().to_string(), channel);
        }

        let lookup = |kind, settings: &ComponentSettings| {
            settings
                .channel_names()
                .into_iter()
                .map(|channel| {
                    channels
                        .get(channel)
                        .cloned()
                        .ok_or_else(|| ConfigError::UnknownChannel {
                            kind,
                            name: settings.name().to_string(),
                            channel: channel.to_string(),
                        })
                })
                .collect::<ConfigResult<Vec<_>>>()
        };

        let mut sources = Vec::with_capacity(config.sources.len());
        for settings in &config.sources {
            let mut source = registry
                .build_source(type_of(settings), settings)
                .map_err(|source| build_error(ComponentKind::Source, settings, source))?;
            for channel in lookup(ComponentKind::Source, settings)? {
                source.set_channel(channel);
            }
            sources.push(source);
        }

        let mut sinks = Vec::with_capacity(config.sinks.len());
        for settings in &config.sinks {
            let mut sink = registry
                .build_sink(type_of(settings), settings)
                .map_err(|source| build_error(ComponentKind::Sink, settings, source))?;
            for channel in lookup(ComponentKind::Sink, settings)? {
                sink.set_channel(channel);
            }
            sinks.push(sink);
        }

        tracing::info!(
            channels = channels.len(),
            sources = sources.len(),
            sinks = sinks.len(),
            "pipeline built"
        );

        Ok(Self {
            channels,
            sources,
            sinks,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// Start channels, then sinks, then sources
    ///
    /// Sources come last so nothing is ingested before its consumers run.
    /// On failure the tasks already spawned are cancelled.
    pub fn start(&mut self) -> ConfigResult<()> {
        let result = self.start_all();
        if result.is_err() {
            self.shutdown.cancel();
        }
        result
    }

    fn start_all(&mut self) -> ConfigResult<()> {
        for (name, channel) in &self.channels {
            channel.start().map_err(|e| ConfigError::Start {
                kind: ComponentKind::Channel,
                name: name.clone(),
                source: e.into(),
            })?;
        }

        for sink in &mut self.sinks {
            let handle = sink
                .start(self.shutdown.child_token())
                .map_err(|source| ConfigError::Start {
                    kind: ComponentKind::Sink,
                    name: sink.name().to_string(),
                    source,
                })?;
            self.tasks.push(handle);
        }

        for source in &mut self.sources {
            let handle = source
                .start(self.shutdown.child_token())
                .map_err(|e| ConfigError::Start {
                    kind: ComponentKind::Source,
                    name: source.name().to_string(),
                    source: e,
                })?;
            self.tasks.push(handle);
        }

        tracing::info!(tasks = self.tasks.len(), "pipeline started");
        Ok(())
    }

    /// Token whose cancellation stops every task
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Offer each component its entry from `config`, matched by name
    ///
    /// Returns how many components accepted their settings. Entries for
    /// components that were not built are ignored.
    pub fn reload(&self, config: &PipelineConfig) -> usize {
        let mut accepted = 0;
        let mut offer = |kind: ComponentKind, name: &str, ok: bool| {
            if ok {
                accepted += 1;
            } else {
                tracing::warn!(kind = %kind, name = %name, "settings rejected on reload");
            }
        };

        for settings in &config.channels {
            if let Some(channel) = self.channels.get(settings.name()) {
                offer(ComponentKind::Channel, settings.name(), channel.reload_config(settings));
            }
        }
        for settings in &config.sources {
            if let Some(source) = self.sources.iter().find(|s| s.name() == settings.name()) {
                offer(ComponentKind::Source, settings.name(), source.reload_config(settings));
            }
        }
        for settings in &config.sinks {
            if let Some(sink) = self.sinks.iter().find(|s| s.name() == settings.name()) {
                offer(ComponentKind::Sink, settings.name(), sink.reload_config(settings));
            }
        }
        accepted
    }

    pub fn channel(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).cloned()
    }

    /// Listening address of a started source
    pub fn source_addr(&self, name: &str) -> Option<SocketAddr> {
        self.sources
            .iter()
            .find(|s| s.name() == name)
            .and_then(|s| s.local_addr())
    }

    /// Cancel every task and wait up to `grace` for them to finish
    pub async fn stop(self, grace: Duration) {
        self.shutdown.cancel();

        let pending = self.tasks.len();
        match tokio::time::timeout(grace, join_all(self.tasks)).await {
            Ok(results) => {
                let panicked = results.iter().filter(|r| r.is_err()).count();
                if panicked > 0 {
                    tracing::warn!(panicked, "some tasks ended abnormally");
                }
                tracing::info!(tasks = pending, "pipeline stopped");
            }
            Err(_) => {
                tracing::warn!(tasks = pending, grace = ?grace, "pipeline stop timed out");
            }
        }
    }
}

fn type_of(settings: &ComponentSettings) -> &str {
    settings.get(TYPE_KEY).unwrap_or_default()
}

fn build_error(
    kind: ComponentKind,
    settings: &ComponentSettings,
    source: crate::registry::RegistryError,
) -> ConfigError {
    ConfigError::Build {
        kind,
        name: settings.name().to_string(),
        source,
    }
}
