//! collectord
//!
//! An event collection daemon. Sources accept events, channels buffer
//! them and sinks deliver them, removing a batch from its channel only
//! after delivery succeeded (at-least-once).
//!
//! # Modules
//!
//! - `types`: `Event`, component settings and errors
//! - `channel`: the `Channel` contract with memory and durable backends
//! - `protocol`: length-prefixed JSON framing used over TCP
//! - `sources`: TCP and HTTP ingestion
//! - `sinks`: TCP forwarding, console and rolling-file delivery
//! - `registry`: component factories by type name
//! - `config`: configuration file loading and validation
//! - `pipeline`: wiring and lifecycle of a configured pipeline
//! - `utils`: atomic file writes and timestamps
//!
//! # Example
//!
//! ```no_run
//! use collectord::{Pipeline, PipelineConfig, Registry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::load("/etc/collectord.json")?;
//!     let mut pipeline = Pipeline::build(&config, &Registry::with_builtins())?;
//!     pipeline.start()?;
//!     pipeline.shutdown_token().cancelled().await;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod sinks;
pub mod sources;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use channel::{Channel, ChannelError, DurableChannel, MemoryChannel};
pub use config::{ConfigError, PipelineConfig};
pub use pipeline::Pipeline;
pub use registry::Registry;
pub use sinks::Sink;
pub use sources::Source;
pub use types::{ComponentError, ComponentSettings, Event};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
