//! TCP listening source
//!
//! Accepts connections from `NetworkSink`s and decodes the frame stream
//! of each one in its own task. Heartbeats are dropped; every other event
//! goes to all bound channels, one append per socket read. A malformed
//! stream closes only its own connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{bind_listener, bound_address, fan_out_blocking, Source, DEFAULT_BIND_ADDRESS};
use crate::channel::Channel;
use crate::protocol::{FrameError, FrameReader};
use crate::types::{ComponentResult, ComponentSettings};

#[derive(Debug, Clone)]
pub struct NetworkSourceConfig {
    pub address: String,
    pub port: u16,
}

impl NetworkSourceConfig {
    pub fn new(port: u16) -> Self {
        Self {
            address: DEFAULT_BIND_ADDRESS.to_string(),
            port,
        }
    }

    /// Settings: `port` required; `address` optional
    pub fn from_settings(settings: &ComponentSettings) -> ComponentResult<Self> {
        Ok(Self {
            address: settings.get_or("address", DEFAULT_BIND_ADDRESS).to_string(),
            port: settings.require_parsed("port")?,
        })
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }
}

/// Per-connection counters, logged when the peer disconnects
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConnectionStats {
    pub forwarded: u64,
    pub heartbeats: u64,
    pub rejected: u64,
}

pub struct NetworkSource {
    name: String,
    config: NetworkSourceConfig,
    channels: Vec<Arc<dyn Channel>>,
    local_addr: Option<SocketAddr>,
}

impl NetworkSource {
    pub fn new(name: impl Into<String>, config: NetworkSourceConfig) -> Self {
        Self {
            name: name.into(),
            config,
            channels: Vec::new(),
            local_addr: None,
        }
    }

    pub fn from_settings(settings: &ComponentSettings) -> ComponentResult<Self> {
        Ok(Self::new(
            settings.name(),
            NetworkSourceConfig::from_settings(settings)?,
        ))
    }
}

impl Source for NetworkSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_channel(&mut self, channel: Arc<dyn Channel>) {
        self.channels.push(channel);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn start(&mut self, shutdown: CancellationToken) -> ComponentResult<JoinHandle<()>> {
        let listener = bind_listener(&self.name, &self.config.address, self.config.port)?;
        self.local_addr = bound_address(&listener);

        tracing::info!(
            source = %self.name,
            address = ?self.local_addr,
            channels = self.channels.len(),
            "network source listening"
        );

        let name: Arc<str> = Arc::from(self.name.as_str());
        let channels: Arc<[Arc<dyn Channel>]> = Arc::from(self.channels.clone());
        Ok(tokio::spawn(accept_loop(name, listener, channels, shutdown)))
    }
}

async fn accept_loop(
    name: Arc<str>,
    listener: TcpListener,
    channels: Arc<[Arc<dyn Channel>]>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(source = %name, peer = %peer, error = %e, "failed to set TCP_NODELAY");
                    }
                    let name = Arc::clone(&name);
                    let channels = Arc::clone(&channels);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tracing::debug!(source = %name, peer = %peer, "connection opened");
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            result = handle_connection(&name, stream, &channels) => {
                                log_connection_end(&name, peer, result);
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(source = %name, error = %e, "accept error");
                }
            }
        }
    }

    tracing::info!(source = %name, "network source stopped");
}

/// Decode `reader` until end of stream, fanning out every real event
///
/// Events decoded from one read are appended as a single batch.
pub(crate) async fn handle_connection<R>(
    name: &Arc<str>,
    reader: R,
    channels: &Arc<[Arc<dyn Channel>]>,
) -> (ConnectionStats, Result<(), FrameError>)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameReader::new(reader);
    let mut stats = ConnectionStats::default();

    loop {
        let mut batch = match frames.next_batch().await {
            Ok(batch) if batch.is_empty() => return (stats, Ok(())),
            Ok(batch) => batch,
            Err(e) => return (stats, Err(e)),
        };

        let received = batch.len();
        batch.retain(|event| !event.is_heartbeat());
        stats.heartbeats += (received - batch.len()) as u64;
        if batch.is_empty() {
            continue;
        }

        let count = batch.len() as u64;
        stats.forwarded += count;
        if fan_out_blocking(Arc::clone(name), Arc::clone(channels), batch).await > 0 {
            stats.rejected += count;
        }
    }
}

fn log_connection_end(name: &str, peer: SocketAddr, result: (ConnectionStats, Result<(), FrameError>)) {
    let (stats, outcome) = result;
    match outcome {
        Ok(()) => tracing::debug!(
            source = %name,
            peer = %peer,
            forwarded = stats.forwarded,
            heartbeats = stats.heartbeats,
            rejected = stats.rejected,
            "connection closed"
        ),
        Err(e) => tracing::warn!(
            source = %name,
            peer = %peer,
            forwarded = stats.forwarded,
            error = %e,
            "connection dropped"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    use super::*;
    use crate::channel::contract::{numbered_events, RecordingChannel, RejectingChannel};
    use crate::channel::MemoryChannel;
    use crate::protocol::encode_frame;
    use crate::types::Event;

    fn src() -> Arc<str> {
        Arc::from("src")
    }

    fn bound(channels: Vec<Arc<dyn Channel>>) -> Arc<[Arc<dyn Channel>]> {
        Arc::from(channels)
    }

    fn stream_of(events: &[Event]) -> BytesMut {
        let mut buf = BytesMut::new();
        for event in events {
            encode_frame(event, &mut buf).unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn test_heartbeats_are_not_forwarded() {
        let channel = Arc::new(MemoryChannel::new("mem"));
        let channels = bound(vec![channel.clone()]);
        let bytes = stream_of(&[
            Event::heartbeat(),
            Event::new("Event 0"),
            Event::heartbeat(),
            Event::new("Event 1"),
        ]);

        let (stats, result) = handle_connection(&src(), &bytes[..], &channels).await;

        assert!(result.is_ok());
        assert_eq!(stats.heartbeats, 2);
        assert_eq!(stats.forwarded, 2);
        let stored = channel.get_all().unwrap();
        assert_eq!(stored, vec![Event::new("Event 0"), Event::new("Event 1")]);
    }

    #[tokio::test]
    async fn test_every_channel_receives_every_event() {
        let first = Arc::new(MemoryChannel::new("first"));
        let second = Arc::new(MemoryChannel::new("second"));
        let channels = bound(vec![first.clone(), Arc::new(RejectingChannel), second.clone()]);

        let (stats, result) =
            handle_connection(&src(), &stream_of(&numbered_events(3))[..], &channels).await;

        assert!(result.is_ok());
        assert_eq!(stats.rejected, 3);
        assert_eq!(first.get_all().unwrap(), numbered_events(3));
        assert_eq!(second.get_all().unwrap(), numbered_events(3));
    }

    #[tokio::test]
    async fn test_garbage_ends_connection_after_good_frames() {
        let channel = Arc::new(MemoryChannel::new("mem"));
        let channels = bound(vec![channel.clone()]);
        let mut bytes = stream_of(&[Event::new("ok")]);
        bytes.extend_from_slice(&[0, 0, 0, 2, b'?', b'?']);

        let (stats, result) = handle_connection(&src(), &bytes[..], &channels).await;

        assert!(matches!(result, Err(FrameError::Json(_))));
        assert_eq!(stats.forwarded, 1);
        assert_eq!(channel.len(), 1);
    }

    #[tokio::test]
    async fn test_one_append_per_read() {
        let recorder = Arc::new(RecordingChannel::new());
        let channels = bound(vec![recorder.clone()]);
        let mut events = numbered_events(5);
        events.insert(2, Event::heartbeat());

        let (stats, result) = handle_connection(&src(), &stream_of(&events)[..], &channels).await;

        assert!(result.is_ok());
        assert_eq!(stats.forwarded, 5);
        assert_eq!(stats.heartbeats, 1);
        assert_eq!(recorder.batch_sizes(), vec![5]);
        assert_eq!(recorder.get_all().unwrap(), numbered_events(5));
    }

    #[tokio::test]
    async fn test_listener_accepts_concurrent_connections() {
        let channel = Arc::new(MemoryChannel::new("mem"));
        let mut source = NetworkSource::new(
            "net",
            NetworkSourceConfig::new(0).with_address("127.0.0.1"),
        );
        source.set_channel(channel.clone());

        let shutdown = CancellationToken::new();
        let handle = source.start(shutdown.clone()).unwrap();
        let addr = source.local_addr().unwrap();

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        // The first connection stays open while the second one sends.
        second.write_all(&stream_of(&[Event::new("b")])).await.unwrap();
        first.write_all(&stream_of(&[Event::new("a")])).await.unwrap();
        second.shutdown().await.unwrap();

        for _ in 0..100 {
            if channel.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(channel.len(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_config_defaults_to_all_interfaces() {
        let settings = ComponentSettings::new().with("port", "6000");
        let config = NetworkSourceConfig::from_settings(&settings).unwrap();
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.port, 6000);

        assert!(NetworkSourceConfig::from_settings(&ComponentSettings::new()).is_err());
    }
}
