//! Buffering channels between sources and sinks
//!
//! A channel is a FIFO with a two-phase read: consumers peek a batch with
//! `get_oldest`/`get_all`, try to deliver it, then either acknowledge it
//! with `confirm_get(count)` or abort with `confirm_get(0)`. Entries leave
//! the buffer only through an acknowledgment.
//!
//! ```text
//! source ──add_event──► ┌───────────────┐ ──get_all──► sink
//!                       │   channel     │
//!                       │ oldest…newest │ ◄─confirm_get(n)── (delivered)
//!                       └───────────────┘ ◄─confirm_get(0)── (failed)
//! ```
//!
//! Backends:
//! - `MemoryChannel`: process-local, lost on restart
//! - `DurableChannel`: append-only log on disk, survives restart
//!
//! A consumer keeps at most one unacknowledged batch per channel. Peeking
//! again before confirming or aborting leaves it unspecified which entries
//! the next confirmation removes.

mod durable;
mod memory;

#[cfg(test)]
pub(crate) mod contract;

use thiserror::Error;

use crate::types::{ComponentSettings, Event};

pub use durable::{DurableChannel, DurableConfig};
pub use memory::MemoryChannel;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors reported by channel backends
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupted row: {0}")]
    Corrupted(String),
}

/// Producer/consumer contract shared by every buffer backend
///
/// All methods take `&self`; implementations synchronize internally so a
/// channel can be shared as `Arc<dyn Channel>` between one or more sources
/// and its sink.
pub trait Channel: Send + Sync {
    /// Instance name from configuration
    fn name(&self) -> &str;

    /// Append one event at the tail
    fn add_event(&self, event: &Event) -> ChannelResult<()>;

    /// Append a batch in order
    ///
    /// On failure part of the batch may already be buffered.
    fn add_events(&self, events: &[Event]) -> ChannelResult<()>;

    /// Up to `n` oldest events, oldest first, without removing them
    fn get_oldest(&self, n: usize) -> ChannelResult<Vec<Event>>;

    /// Every buffered event, oldest first, without removing them
    fn get_all(&self) -> ChannelResult<Vec<Event>>;

    /// Acknowledge the oldest `count` events of the last peek
    ///
    /// `0` aborts: pending bookkeeping is dropped and nothing is removed.
    fn confirm_get(&self, count: usize) -> ChannelResult<()>;

    /// Begin backend maintenance; calling it again is a no-op
    fn start(&self) -> ChannelResult<()>;

    /// Number of buffered (unacknowledged) events
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer new settings; returns whether they were accepted
    fn reload_config(&self, _settings: &ComponentSettings) -> bool {
        true
    }
}
