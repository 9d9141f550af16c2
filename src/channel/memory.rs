//! Process-local channel backend
//!
//! Everything lives in a `VecDeque` behind one mutex. Peeks take the same
//! lock as appends and confirmations, so a reader never observes a
//! half-applied mutation. Contents are lost when the process exits.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::{Channel, ChannelResult};
use crate::types::{ComponentResult, ComponentSettings, Event};

/// Non-durable FIFO channel
pub struct MemoryChannel {
    name: String,
    inner: Mutex<MemoryQueue>,
}

#[derive(Default)]
struct MemoryQueue {
    events: VecDeque<Event>,
    /// Largest batch handed out since the last confirm/abort
    handed_out: usize,
}

impl MemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(MemoryQueue::default()),
        }
    }

    /// Build from configuration; the backend has no options of its own
    pub fn from_settings(settings: &ComponentSettings) -> ComponentResult<Self> {
        Ok(Self::new(settings.name()))
    }

    fn peek(&self, limit: Option<usize>) -> Vec<Event> {
        let mut queue = self.inner.lock();
        let take = limit.map_or(queue.events.len(), |n| n.min(queue.events.len()));
        let batch: Vec<Event> = queue.events.iter().take(take).cloned().collect();
        queue.handed_out = queue.handed_out.max(batch.len());
        batch
    }
}

impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_event(&self, event: &Event) -> ChannelResult<()> {
        self.inner.lock().events.push_back(event.clone());
        Ok(())
    }

    fn add_events(&self, events: &[Event]) -> ChannelResult<()> {
        self.inner.lock().events.extend(events.iter().cloned());
        Ok(())
    }

    fn get_oldest(&self, n: usize) -> ChannelResult<Vec<Event>> {
        Ok(self.peek(Some(n)))
    }

    fn get_all(&self) -> ChannelResult<Vec<Event>> {
        Ok(self.peek(None))
    }

    fn confirm_get(&self, count: usize) -> ChannelResult<()> {
        let mut queue = self.inner.lock();
        let remove = count.min(queue.handed_out).min(queue.events.len());
        queue.events.drain(..remove);
        queue.handed_out = 0;

        if remove > 0 {
            tracing::trace!(channel = %self.name, removed = remove, "confirmed batch");
        }
        Ok(())
    }

    fn start(&self) -> ChannelResult<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.lock().events.len()
    }
}
