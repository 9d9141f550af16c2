//! Ingestion endpoints
//!
//! A source produces events and appends each one to every channel bound
//! to it. Fan-out is best-effort: a channel that rejects an event is
//! logged and skipped, the others still receive it. Channel appends may
//! fsync, so async sources run them on the blocking pool.
//!
//! - `NetworkSource`: TCP listener fed by remote `NetworkSink`s
//! - `HttpSource`: HTTP endpoint turning requests into events

mod http;
mod network;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::Channel;
use crate::types::{ComponentError, ComponentResult, ComponentSettings, Event};

pub use self::http::{HttpSource, HttpSourceConfig};
pub use self::network::{NetworkSource, NetworkSourceConfig};

/// Default bind address for listening sources
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// A component that pushes events into its bound channels
pub trait Source: Send + Sync {
    /// Instance name from configuration
    fn name(&self) -> &str;

    /// Add a channel to the fan-out list
    fn set_channel(&mut self, channel: Arc<dyn Channel>);

    /// Bind and spawn the ingestion task; it runs until `shutdown` is
    /// cancelled
    fn start(&mut self, shutdown: CancellationToken) -> ComponentResult<JoinHandle<()>>;

    /// Address the source listens on, once started
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Offer new settings; returns whether they were accepted
    fn reload_config(&self, _settings: &ComponentSettings) -> bool {
        true
    }
}

/// Append `events` to every channel; returns how many rejected them
pub(crate) fn fan_out(source: &str, channels: &[Arc<dyn Channel>], events: &[Event]) -> usize {
    let mut failed = 0;
    for channel in channels {
        if let Err(e) = channel.add_events(events) {
            failed += 1;
            tracing::warn!(
                source = %source,
                channel = %channel.name(),
                events = events.len(),
                error = %e,
                "channel rejected events"
            );
        }
    }
    failed
}

/// `fan_out` on the blocking pool, keeping runtime workers free of disk I/O
pub(crate) async fn fan_out_blocking(
    source: Arc<str>,
    channels: Arc<[Arc<dyn Channel>]>,
    events: Vec<Event>,
) -> usize {
    let name = Arc::clone(&source);
    let total = channels.len();
    match tokio::task::spawn_blocking(move || fan_out(&source, &channels, &events)).await {
        Ok(failed) => failed,
        Err(e) => {
            tracing::error!(source = %name, error = %e, "fan-out task failed");
            total
        }
    }
}

/// Bind a listening socket synchronously so failures surface at startup
///
/// Must be called from inside a tokio runtime.
pub(crate) fn bind_listener(
    component: &str,
    address: &str,
    port: u16,
) -> ComponentResult<tokio::net::TcpListener> {
    let target = format!("{}:{}", address, port);
    let bind_error = |source| ComponentError::Bind {
        component: component.to_string(),
        address: target.clone(),
        source,
    };

    let listener = std::net::TcpListener::bind(&target).map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;
    tokio::net::TcpListener::from_std(listener).map_err(bind_error)
}

/// Address a started listener actually bound (port 0 resolves here)
pub(crate) fn bound_address(listener: &tokio::net::TcpListener) -> Option<SocketAddr> {
    listener.local_addr().ok()
}
