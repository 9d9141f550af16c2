//! Sink that writes events to the log
//!
//! Handy for debugging a pipeline: every cycle drains the channel and
//! logs each event's headers and body at info level.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{ChannelBinding, Sink, DEFAULT_POLL_INTERVAL};
use crate::channel::{Channel, ChannelResult};
use crate::types::{ComponentResult, ComponentSettings};

pub struct ConsoleSink {
    name: String,
    poll_interval: Duration,
    binding: ChannelBinding,
}

impl ConsoleSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            binding: ChannelBinding::default(),
        }
    }

    /// Settings: `poll_interval_ms` optional
    pub fn from_settings(settings: &ComponentSettings) -> ComponentResult<Self> {
        let mut sink = Self::new(settings.name());
        sink.poll_interval = settings.millis_or("poll_interval_ms", DEFAULT_POLL_INTERVAL)?;
        Ok(sink)
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_channel(&mut self, channel: Arc<dyn Channel>) {
        self.binding.bind(channel);
    }

    fn start(&mut self, shutdown: CancellationToken) -> ComponentResult<JoinHandle<()>> {
        let name = self.name.clone();
        let binding = self.binding.clone();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(channel) = binding.get() else { continue };
                        if let Err(e) = print_batch(&name, channel.as_ref()) {
                            tracing::warn!(sink = %name, error = %e, "console sink cycle failed");
                        }
                    }
                }
            }
            tracing::debug!(sink = %name, "console sink stopped");
        }))
    }
}

/// Log and acknowledge everything currently buffered
fn print_batch(name: &str, channel: &dyn Channel) -> ChannelResult<usize> {
    let batch = channel.get_all()?;
    for event in &batch {
        tracing::info!(
            sink = %name,
            headers = ?event.headers,
            body = %event.body_lossy(),
            "event"
        );
    }
    channel.confirm_get(batch.len())?;
    Ok(batch.len())
}
