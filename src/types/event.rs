//! Event type carried through the pipeline
//!
//! An event is a flat set of string headers plus an opaque byte body.
//! Events have no identity of their own: channel backends assign
//! buffering ids when they store them.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unit of data moved from sources to sinks
///
/// The zero value (no headers, empty body) is reserved as the liveness
/// heartbeat exchanged between the network sink and source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Metadata headers, unique keys
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Opaque payload, possibly empty
    #[serde(default)]
    pub body: Vec<u8>,
}

impl Event {
    /// Create an event with the given body and no headers
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Builder-style header insertion
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// The heartbeat: an event with no headers and an empty body
    pub fn heartbeat() -> Self {
        Self::default()
    }

    /// True for the zero-value event
    pub fn is_heartbeat(&self) -> bool {
        self.headers.is_empty() && self.body.is_empty()
    }

    /// Look up a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Body decoded as UTF-8, invalid sequences replaced
    pub fn body_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Serialize event to a single JSON line (no trailing newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from a JSON line
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Sum of body sizes of a batch, in bytes
pub fn total_body_len(events: &[Event]) -> usize {
    events.iter().map(|e| e.body.len()).sum()
}
