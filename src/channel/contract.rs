//! Behaviour every `Channel` backend must share
//!
//! Each check starts from an empty channel and leaves it in an arbitrary
//! state; backends call them on fresh instances.

use super::Channel;
use crate::types::Event;

/// Events with body `"Event i"` and header `num = i`
pub fn numbered_events(count: usize) -> Vec<Event> {
    (0..count)
        .map(|i| Event::new(format!("Event {}", i)).with_header("num", i.to_string()))
        .collect()
}

fn bodies(events: &[Event]) -> Vec<String> {
    events.iter().map(|e| e.body_lossy().into_owned()).collect()
}

pub fn check_fifo_order(channel: &dyn Channel) {
    let events = numbered_events(5);
    channel.add_event(&events[0]).unwrap();
    channel.add_events(&events[1..]).unwrap();

    let all = channel.get_all().unwrap();
    assert_eq!(all, events);
    assert_eq!(all[3].header("num"), Some("3"));
}

pub fn check_peek_is_non_destructive(channel: &dyn Channel) {
    channel.add_events(&numbered_events(3)).unwrap();

    let first = channel.get_oldest(2).unwrap();
    let second = channel.get_oldest(2).unwrap();
    assert_eq!(first, second);
    assert_eq!(bodies(&first), vec!["Event 0", "Event 1"]);
    assert_eq!(channel.len(), 3);

    // Oversized requests are capped at the buffer size.
    assert_eq!(channel.get_oldest(100).unwrap().len(), 3);
    channel.confirm_get(0).unwrap();
}

pub fn check_empty_reads(channel: &dyn Channel) {
    assert!(channel.get_all().unwrap().is_empty());
    assert!(channel.get_oldest(10).unwrap().is_empty());
    channel.confirm_get(5).unwrap();
    assert!(channel.is_empty());
}

pub fn check_confirm_removes_exactly_k(channel: &dyn Channel) {
    channel.add_events(&numbered_events(6)).unwrap();

    let batch = channel.get_all().unwrap();
    assert_eq!(batch.len(), 6);
    channel.confirm_get(4).unwrap();

    let rest = channel.get_all().unwrap();
    assert_eq!(bodies(&rest), vec!["Event 4", "Event 5"]);
    channel.confirm_get(0).unwrap();
}

pub fn check_confirm_is_capped_by_peek(channel: &dyn Channel) {
    channel.add_events(&numbered_events(4)).unwrap();

    let peeked = channel.get_oldest(2).unwrap();
    assert_eq!(peeked.len(), 2);
    channel.add_event(&Event::new("late")).unwrap();

    // Asking for more than was handed out removes only what was seen.
    channel.confirm_get(10).unwrap();
    let rest = channel.get_all().unwrap();
    assert_eq!(bodies(&rest), vec!["Event 2", "Event 3", "late"]);
    channel.confirm_get(0).unwrap();
}

pub fn check_abort_keeps_data(channel: &dyn Channel) {
    channel.add_events(&numbered_events(3)).unwrap();

    let before = channel.get_all().unwrap();
    channel.confirm_get(0).unwrap();
    let after = channel.get_all().unwrap();
    assert_eq!(before, after);

    // The abort also cleared the pending batch: a confirm with nothing
    // peeked since removes nothing.
    channel.confirm_get(0).unwrap();
    channel.confirm_get(2).unwrap();
    assert_eq!(channel.len(), 3);
}

pub fn check_oldest_then_confirm_one(channel: &dyn Channel) {
    channel.add_events(&numbered_events(3)).unwrap();

    let first = channel.get_oldest(1).unwrap();
    assert_eq!(bodies(&first), vec!["Event 0"]);
    channel.confirm_get(1).unwrap();

    let next = channel.get_oldest(1).unwrap();
    assert_eq!(bodies(&next), vec!["Event 1"]);
    channel.confirm_get(0).unwrap();
}

pub fn check_start_is_idempotent(channel: &dyn Channel) {
    channel.start().unwrap();
    channel.start().unwrap();
    channel.add_event(&Event::new("after start")).unwrap();
    assert_eq!(channel.len(), 1);
}

/// Channel whose writes always fail; reads see an empty buffer
pub struct RejectingChannel;

impl Channel for RejectingChannel {
    fn name(&self) -> &str {
        "rejecting"
    }

    fn add_event(&self, _event: &Event) -> super::ChannelResult<()> {
        Err(super::ChannelError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }

    fn add_events(&self, events: &[Event]) -> super::ChannelResult<()> {
        match events.first() {
            Some(event) => self.add_event(event),
            None => Ok(()),
        }
    }

    fn get_oldest(&self, _n: usize) -> super::ChannelResult<Vec<Event>> {
        Ok(Vec::new())
    }

    fn get_all(&self) -> super::ChannelResult<Vec<Event>> {
        Ok(Vec::new())
    }

    fn confirm_get(&self, _count: usize) -> super::ChannelResult<()> {
        Ok(())
    }

    fn start(&self) -> super::ChannelResult<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        0
    }
}

/// Memory channel that records the size and thread of every append call
pub struct RecordingChannel {
    inner: super::MemoryChannel,
    appends: parking_lot::Mutex<Vec<(usize, std::thread::ThreadId)>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            inner: super::MemoryChannel::new("recording"),
            appends: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Batch size of each append, in call order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.appends.lock().iter().map(|(size, _)| *size).collect()
    }

    /// Thread each append ran on, in call order
    pub fn threads(&self) -> Vec<std::thread::ThreadId> {
        self.appends.lock().iter().map(|(_, thread)| *thread).collect()
    }
}

impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    fn add_event(&self, event: &Event) -> super::ChannelResult<()> {
        self.add_events(std::slice::from_ref(event))
    }

    fn add_events(&self, events: &[Event]) -> super::ChannelResult<()> {
        self.appends
            .lock()
            .push((events.len(), std::thread::current().id()));
        self.inner.add_events(events)
    }

    fn get_oldest(&self, n: usize) -> super::ChannelResult<Vec<Event>> {
        self.inner.get_oldest(n)
    }

    fn get_all(&self) -> super::ChannelResult<Vec<Event>> {
        self.inner.get_all()
    }

    fn confirm_get(&self, count: usize) -> super::ChannelResult<()> {
        self.inner.confirm_get(count)
    }

    fn start(&self) -> super::ChannelResult<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
