//! Delivery endpoints
//!
//! A sink drains exactly one channel in its own task: peek a batch,
//! deliver it, then confirm it (or abort with `confirm_get(0)` on
//! failure).
//!
//! - `NetworkSink`: forwards over TCP to a remote `NetworkSource`
//! - `ConsoleSink`: writes every event to the log
//! - `FileSink`: line-oriented rolling files

mod console;
mod file;
mod network;

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::Channel;
use crate::types::{ComponentResult, ComponentSettings};

pub use console::ConsoleSink;
pub use file::{FileSink, FileSinkConfig};
pub use network::{NetworkSink, NetworkSinkConfig, MIN_PACKET_THRESHOLD};

/// Default delay between two delivery cycles
pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// A component that pulls events out of one channel
pub trait Sink: Send + Sync {
    /// Instance name from configuration
    fn name(&self) -> &str;

    /// Bind the channel to drain; replaces any previous binding
    fn set_channel(&mut self, channel: Arc<dyn Channel>);

    /// Spawn the delivery loop; it runs until `shutdown` is cancelled
    fn start(&mut self, shutdown: CancellationToken) -> ComponentResult<JoinHandle<()>>;

    /// Offer new settings; returns whether they were accepted
    fn reload_config(&self, _settings: &ComponentSettings) -> bool {
        true
    }
}

/// Channel slot shared between a sink and its running loop
///
/// The loop reads the slot every cycle, so a channel bound after `start`
/// is picked up on the next tick.
#[derive(Clone, Default)]
pub struct ChannelBinding(Arc<RwLock<Option<Arc<dyn Channel>>>>);

impl ChannelBinding {
    pub fn bind(&self, channel: Arc<dyn Channel>) {
        *self.0.write() = Some(channel);
    }

    pub fn get(&self) -> Option<Arc<dyn Channel>> {
        self.0.read().clone()
    }
}
