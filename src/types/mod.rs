//! Data types shared by every part of the collector
//!
//! - `Event`: the unit of data moved through the pipeline
//! - `ComponentSettings`: construction options for sources, channels, sinks
//! - `ComponentError`: construction and startup failures

mod error;
mod event;
mod settings;

pub use error::{ComponentError, ComponentResult};
pub use event::{total_body_len, Event};
pub use settings::{ComponentSettings, CHANNEL_KEY, NAME_KEY, TYPE_KEY};
