//! TCP forwarding sink
//!
//! Drains its channel on a fixed cycle and streams the events to a remote
//! `NetworkSource` over one persistent connection.
//!
//! Each cycle:
//!
//! ```text
//! bound? ─no─► skip
//!   │yes
//! connected? ─no─► connect (bounded) ─fail─► log attempt, retry next tick
//!   │yes
//! get_all ─► [small batch? heartbeat + flush] ─► frames ─► flush
//!   │ok                                            │err
//! confirm_get(n)                     drop connection, confirm_get(0)
//! ```
//!
//! A batch that failed halfway is sent again in full later, so the remote
//! side may see duplicates.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{ChannelBinding, Sink, DEFAULT_POLL_INTERVAL};
use crate::channel::{Channel, ChannelError};
use crate::protocol::{FrameError, FrameWriter};
use crate::types::{total_body_len, ComponentResult, ComponentSettings, Event};

/// Batches whose bodies add up to less than this are preceded by a
/// heartbeat, so a dead connection fails before real data is written.
pub const MIN_PACKET_THRESHOLD: usize = 4096;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Target and timing of a network sink
#[derive(Debug, Clone)]
pub struct NetworkSinkConfig {
    pub host: String,
    pub port: u16,
    /// Delay between delivery cycles
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    /// Bound on every write and flush
    pub write_timeout: Duration,
}

impl NetworkSinkConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Settings: `host`, `port` required; `poll_interval_ms`,
    /// `connect_timeout_ms`, `write_timeout_ms` optional.
    pub fn from_settings(settings: &ComponentSettings) -> ComponentResult<Self> {
        Ok(Self {
            host: settings.require("host")?.to_string(),
            port: settings.require_parsed("port")?,
            poll_interval: settings.millis_or("poll_interval_ms", DEFAULT_POLL_INTERVAL)?,
            connect_timeout: settings.millis_or("connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT)?,
            write_timeout: settings.millis_or("write_timeout_ms", DEFAULT_WRITE_TIMEOUT)?,
        })
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// `host:port`
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Failures of one delivery cycle
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to connect to {target}: {source}")]
    ConnectFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] FrameError),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Counters kept by a running forwarder
#[derive(Debug, Default)]
pub struct ForwarderMetrics {
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
    events_sent: AtomicU64,
    events_dropped: AtomicU64,
    connects: AtomicU64,
}

impl ForwarderMetrics {
    pub fn batches_sent(&self) -> u64 {
        self.batches_sent.load(Ordering::Relaxed)
    }

    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Relaxed)
    }

    pub fn events_sent(&self) -> u64 {
        self.events_sent.load(Ordering::Relaxed)
    }

    /// Events discarded because they could not be framed
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

/// Sink forwarding to a remote network source
pub struct NetworkSink {
    name: String,
    config: NetworkSinkConfig,
    binding: ChannelBinding,
    metrics: Arc<ForwarderMetrics>,
}

impl NetworkSink {
    pub fn new(name: impl Into<String>, config: NetworkSinkConfig) -> Self {
        Self {
            name: name.into(),
            config,
            binding: ChannelBinding::default(),
            metrics: Arc::new(ForwarderMetrics::default()),
        }
    }

    pub fn from_settings(settings: &ComponentSettings) -> ComponentResult<Self> {
        Ok(Self::new(
            settings.name(),
            NetworkSinkConfig::from_settings(settings)?,
        ))
    }

    pub fn config(&self) -> &NetworkSinkConfig {
        &self.config
    }

    /// Shared counters, readable while the sink runs
    pub fn metrics(&self) -> Arc<ForwarderMetrics> {
        Arc::clone(&self.metrics)
    }

    fn forwarder(&self) -> Forwarder {
        Forwarder {
            name: self.name.clone(),
            config: self.config.clone(),
            binding: self.binding.clone(),
            metrics: Arc::clone(&self.metrics),
            connection: None,
            failed_attempts: 0,
        }
    }
}

impl Sink for NetworkSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_channel(&mut self, channel: Arc<dyn Channel>) {
        self.binding.bind(channel);
    }

    fn start(&mut self, shutdown: CancellationToken) -> ComponentResult<JoinHandle<()>> {
        tracing::info!(
            sink = %self.name,
            target = %self.config.target(),
            "network sink starting"
        );
        Ok(tokio::spawn(self.forwarder().run(shutdown)))
    }
}

/// State owned by the delivery loop
struct Forwarder {
    name: String,
    config: NetworkSinkConfig,
    binding: ChannelBinding,
    metrics: Arc<ForwarderMetrics>,
    connection: Option<FrameWriter<TcpStream>>,
    failed_attempts: u64,
}

impl Forwarder {
    async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.cycle().await,
            }
        }

        tracing::info!(
            sink = %self.name,
            batches_sent = self.metrics.batches_sent(),
            batches_failed = self.metrics.batches_failed(),
            events_sent = self.metrics.events_sent(),
            events_dropped = self.metrics.events_dropped(),
            connects = self.metrics.connects(),
            "network sink stopped"
        );
    }

    async fn cycle(&mut self) {
        let Some(channel) = self.binding.get() else {
            tracing::trace!(sink = %self.name, "no channel bound, skipping cycle");
            return;
        };

        if self.connection.is_none() {
            match self.connect().await {
                Ok(writer) => self.connection = Some(writer),
                Err(e) => {
                    self.failed_attempts += 1;
                    tracing::warn!(
                        sink = %self.name,
                        attempt = self.failed_attempts,
                        error = %e,
                        "connection attempt failed, retrying next cycle"
                    );
                    return;
                }
            }
        }
        let Some(writer) = self.connection.as_mut() else {
            return;
        };

        match deliver_batch(channel.as_ref(), writer).await {
            Ok(delivered) if delivered.confirmed() == 0 => {}
            Ok(delivered) => {
                self.metrics.batches_sent.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .events_sent
                    .fetch_add(delivered.sent as u64, Ordering::Relaxed);
                self.metrics
                    .events_dropped
                    .fetch_add(delivered.dropped as u64, Ordering::Relaxed);
                tracing::debug!(
                    sink = %self.name,
                    events = delivered.sent,
                    dropped = delivered.dropped,
                    "batch delivered"
                );
            }
            Err(ForwardError::Channel(e)) => {
                tracing::warn!(sink = %self.name, error = %e, "channel error during delivery");
            }
            Err(e) => {
                self.metrics.batches_failed.fetch_add(1, Ordering::Relaxed);
                self.connection = None;
                tracing::warn!(
                    sink = %self.name,
                    error = %e,
                    "delivery failed, connection dropped"
                );
            }
        }
    }

    async fn connect(&mut self) -> Result<FrameWriter<TcpStream>, ForwardError> {
        let target = self.config.target();
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(&target)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ForwardError::ConnectFailed { target, source }),
            Err(_) => {
                return Err(ForwardError::ConnectFailed {
                    target,
                    source: std::io::Error::new(ErrorKind::TimedOut, "connection timed out"),
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(sink = %self.name, error = %e, "failed to set TCP_NODELAY");
        }

        self.metrics.connects.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            sink = %self.name,
            target = %target,
            failed_attempts = self.failed_attempts,
            "connected"
        );
        self.failed_attempts = 0;
        Ok(FrameWriter::new(stream, self.config.write_timeout))
    }
}

/// Outcome of one delivered batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Delivered {
    /// Events written to the connection
    pub sent: usize,
    /// Events that can never be framed, confirmed without being sent
    pub dropped: usize,
}

impl Delivered {
    pub fn confirmed(&self) -> usize {
        self.sent + self.dropped
    }
}

/// Peek everything in `channel`, send it, then confirm or abort
///
/// A transport failure aborts the batch with `confirm_get(0)` before the
/// error is returned. An event that cannot be encoded into a frame is
/// logged and skipped; it is confirmed with the rest of the batch so it
/// cannot block the events queued behind it.
pub(crate) async fn deliver_batch<W>(
    channel: &dyn Channel,
    writer: &mut FrameWriter<W>,
) -> Result<Delivered, ForwardError>
where
    W: AsyncWrite + Unpin,
{
    let batch = channel.get_all()?;
    if batch.is_empty() {
        return Ok(Delivered::default());
    }

    let dropped = match transmit(writer, &batch).await {
        Ok(dropped) => dropped,
        Err(e) => {
            if let Err(abort) = channel.confirm_get(0) {
                tracing::warn!(channel = %channel.name(), error = %abort, "failed to abort batch");
            }
            return Err(e.into());
        }
    };

    channel.confirm_get(batch.len())?;
    Ok(Delivered {
        sent: batch.len() - dropped,
        dropped,
    })
}

/// Write `batch` and flush; returns how many events were unencodable
async fn transmit<W>(writer: &mut FrameWriter<W>, batch: &[Event]) -> Result<usize, FrameError>
where
    W: AsyncWrite + Unpin,
{
    if total_body_len(batch) < MIN_PACKET_THRESHOLD {
        writer.send(&Event::heartbeat()).await?;
        writer.flush().await?;
    }

    let mut dropped = 0;
    for event in batch {
        match writer.send(event).await {
            Ok(()) => {}
            // Encoding fails before any byte reaches the writer.
            Err(e @ (FrameError::TooLarge { .. } | FrameError::Json(_))) => {
                dropped += 1;
                tracing::error!(
                    body_len = event.body.len(),
                    error = %e,
                    "dropping event that cannot be framed"
                );
            }
            Err(e) => return Err(e),
        }
    }
    writer.flush().await?;
    Ok(dropped)
}
