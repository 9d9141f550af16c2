//! Disk-backed channel backend
//!
//! Rows live in an append-only JSON-lines log with strictly increasing
//! sequence ids (see `log`). Peeks remember the ids they returned in a
//! pending list; a confirmation of `count` turns the `count`-th pending id
//! into a high-water mark and drops every row up to and including it.
//!
//! ```text
//! add_event ──► write lock ─► append row ─► fsync
//! get_all   ──► read lock  ─► read rows  ─► pending += ids
//! confirm(n)──► pending[n-1] = mark ─► write lock ─► persist mark, drop rows
//! ```
//!
//! The pending list is process memory only. After a crash every
//! unacknowledged row is delivered again.

mod log;

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use self::log::QueueLog;
use super::{Channel, ChannelResult};
use crate::types::{ComponentError, ComponentResult, ComponentSettings, Event};

pub use self::log::{DurableConfig, DEFAULT_COMPACT_THRESHOLD};

/// Durable FIFO channel backed by a directory on disk
pub struct DurableChannel {
    name: String,
    log: RwLock<QueueLog>,
    pending: Mutex<Vec<u64>>,
    started: AtomicBool,
}

impl DurableChannel {
    /// Open the store in `config.dir`, creating it when absent
    pub fn open(name: impl Into<String>, config: DurableConfig) -> ChannelResult<Self> {
        let name = name.into();
        let log = QueueLog::open(config.clone())?;
        tracing::info!(
            channel = %name,
            dir = %config.dir.display(),
            buffered = log.len(),
            "opened durable channel"
        );

        Ok(Self {
            name,
            log: RwLock::new(log),
            pending: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Build from configuration
    ///
    /// Settings: `path` (alias `db`) is the store directory, required;
    /// `compact_threshold` is optional.
    pub fn from_settings(settings: &ComponentSettings) -> ComponentResult<Self> {
        let dir = settings.require_any(&["path", "db"])?;
        let threshold = settings.parse_or("compact_threshold", DEFAULT_COMPACT_THRESHOLD)?;
        let config = DurableConfig::new(dir).with_compact_threshold(threshold);
        Self::open(settings.name(), config).map_err(ComponentError::from)
    }

    fn peek(&self, limit: Option<usize>) -> ChannelResult<Vec<Event>> {
        let rows = self.log.read().read(limit)?;
        let (ids, events): (Vec<u64>, Vec<Event>) = rows.into_iter().unzip();
        self.pending.lock().extend(ids);
        Ok(events)
    }
}

impl Channel for DurableChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_event(&self, event: &Event) -> ChannelResult<()> {
        self.log.write().append(std::slice::from_ref(event))
    }

    fn add_events(&self, events: &[Event]) -> ChannelResult<()> {
        self.log.write().append(events)
    }

    fn get_oldest(&self, n: usize) -> ChannelResult<Vec<Event>> {
        self.peek(Some(n))
    }

    fn get_all(&self) -> ChannelResult<Vec<Event>> {
        self.peek(None)
    }

    fn confirm_get(&self, count: usize) -> ChannelResult<()> {
        let mark = {
            let mut pending = self.pending.lock();
            let mark = match (count, pending.len()) {
                (0, _) | (_, 0) => None,
                (count, len) => Some(pending[(count - 1).min(len - 1)]),
            };
            pending.clear();
            mark
        };
        let Some(mark) = mark else {
            return Ok(());
        };

        let mut log = self.log.write();
        let removed = log.ack_through(mark)?;
        tracing::trace!(channel = %self.name, mark, removed, "confirmed batch");

        if log.needs_compaction() {
            if let Err(e) = log.compact() {
                tracing::warn!(channel = %self.name, error = %e, "compaction failed");
            }
        }
        Ok(())
    }

    fn start(&self) -> ChannelResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut log = self.log.write();
        log.compact()?;
        tracing::debug!(channel = %self.name, buffered = log.len(), "durable channel started");
        Ok(())
    }

    fn len(&self) -> usize {
        self.log.read().len()
    }
}
