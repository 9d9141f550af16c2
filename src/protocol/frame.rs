//! Length-prefixed event frames
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────┐
//! │ u32 length (BE)  │ JSON-encoded Event (length B) │
//! └──────────────────┴──────────────────────────────┘
//! ```
//!
//! Frames follow each other back to back on one connection. There is no
//! handshake; the zero-value event is the heartbeat.

use std::io;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use crate::types::Event;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest accepted frame payload (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Errors on the event stream
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("stream ended inside a frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    #[error("write timed out after {0:?}")]
    Timeout(Duration),
}

/// Append one frame for `event` to `dst`
pub fn encode_frame(event: &Event, dst: &mut BytesMut) -> Result<(), FrameError> {
    let payload = serde_json::to_vec(event)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            limit: MAX_FRAME_SIZE,
        });
    }

    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.extend_from_slice(&payload);
    Ok(())
}

/// Take one complete frame off the front of `src`
///
/// Returns `Ok(None)` until the whole frame is buffered.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Event>, FrameError> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: len,
            limit: MAX_FRAME_SIZE,
        });
    }

    let frame_end = LENGTH_PREFIX_SIZE + len;
    if src.len() < frame_end {
        src.reserve(frame_end - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    let payload = src.split_to(len);
    Ok(Some(serde_json::from_slice(&payload)?))
}

/// Decodes events from a byte stream
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    deferred: Option<FrameError>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            deferred: None,
        }
    }

    /// Next event, or `None` on a clean end of stream
    pub async fn next_event(&mut self) -> Result<Option<Event>, FrameError> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }
        loop {
            if let Some(event) = decode_frame(&mut self.buf)? {
                return Ok(Some(event));
            }

            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::Truncated {
                    buffered: self.buf.len(),
                });
            }
        }
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Waits for one event, then drains every frame already buffered
    ///
    /// An empty batch means a clean end of stream. A decode error hit
    /// after the first event is held back and returned by the next call,
    /// so the events decoded before it are not lost.
    pub async fn next_batch(&mut self) -> Result<Vec<Event>, FrameError> {
        let Some(first) = self.next_event().await? else {
            return Ok(Vec::new());
        };

        let mut batch = vec![first];
        loop {
            match decode_frame(&mut self.buf) {
                Ok(Some(event)) => batch.push(event),
                Ok(None) => break,
                Err(e) => {
                    self.deferred = Some(e);
                    break;
                }
            }
        }
        Ok(batch)
    }
}

/// Encodes events onto a buffered byte stream
///
/// Every write and flush is bounded by `write_timeout`.
pub struct FrameWriter<W: AsyncWrite> {
    inner: BufWriter<W>,
    scratch: BytesMut,
    write_timeout: Duration,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, write_timeout: Duration) -> Self {
        Self {
            inner: BufWriter::new(inner),
            scratch: BytesMut::new(),
            write_timeout,
        }
    }

    /// Queue one event; bytes may stay buffered until `flush`
    pub async fn send(&mut self, event: &Event) -> Result<(), FrameError> {
        self.scratch.clear();
        encode_frame(event, &mut self.scratch)?;

        let limit = self.write_timeout;
        tokio::time::timeout(limit, self.inner.write_all(&self.scratch))
            .await
            .map_err(|_| FrameError::Timeout(limit))??;
        Ok(())
    }

    /// Push everything buffered to the peer
    pub async fn flush(&mut self) -> Result<(), FrameError> {
        let limit = self.write_timeout;
        tokio::time::timeout(limit, self.inner.flush())
            .await
            .map_err(|_| FrameError::Timeout(limit))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(events: &[Event]) -> BytesMut {
        let mut buf = BytesMut::new();
        for event in events {
            encode_frame(event, &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_prefix_is_big_endian_payload_length() {
        let event = Event::new("hi");
        let buf = framed(std::slice::from_ref(&event));
        let payload = serde_json::to_vec(&event).unwrap();

        assert_eq!(&buf[..4], &(payload.len() as u32).to_be_bytes());
        assert_eq!(&buf[4..], payload.as_slice());
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let full = framed(&[Event::new("Event 0").with_header("num", "0")]);
        let mut partial = BytesMut::from(&full[..full.len() - 3]);

        assert!(decode_frame(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), full.len() - 3);

        partial.extend_from_slice(&full[full.len() - 3..]);
        let event = decode_frame(&mut partial).unwrap().unwrap();
        assert_eq!(event.header("num"), Some("0"));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(
            decode_frame(&mut buf),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_garbage_payload() {
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.extend_from_slice(b"{{{");
        assert!(matches!(decode_frame(&mut buf), Err(FrameError::Json(_))));
    }

    #[tokio::test]
    async fn test_reader_yields_events_then_clean_eof() {
        let bytes = framed(&[Event::heartbeat(), Event::new("a"), Event::new("b")]);
        let mut reader = FrameReader::new(&bytes[..]);

        assert!(reader.next_event().await.unwrap().unwrap().is_heartbeat());
        assert_eq!(reader.next_event().await.unwrap().unwrap().body, b"a");
        assert_eq!(reader.next_event().await.unwrap().unwrap().body, b"b");
        assert!(reader.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_reports_truncated_stream() {
        let bytes = framed(&[Event::new("complete"), Event::new("cut off")]);
        let cut = &bytes[..bytes.len() - 2];
        let mut reader = FrameReader::new(cut);

        assert!(reader.next_event().await.unwrap().is_some());
        assert!(matches!(
            reader.next_event().await,
            Err(FrameError::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_drains_buffered_frames() {
        let bytes = framed(&[Event::new("a"), Event::heartbeat(), Event::new("b")]);
        let mut reader = FrameReader::new(&bytes[..]);

        let batch = reader.next_batch().await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[2].body, b"b");
        assert!(reader.next_batch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_defers_error_behind_good_events() {
        let mut bytes = framed(&[Event::new("a"), Event::new("b")]);
        bytes.put_u32(3);
        bytes.extend_from_slice(b"{{{");
        let mut reader = FrameReader::new(&bytes[..]);

        let batch = reader.next_batch().await.unwrap();
        assert_eq!(batch, vec![Event::new("a"), Event::new("b")]);
        assert!(matches!(reader.next_batch().await, Err(FrameError::Json(_))));
    }

    #[tokio::test]
    async fn test_writer_output_is_readable() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client, Duration::from_secs(1));
        writer.send(&Event::new("one")).await.unwrap();
        writer.send(&Event::new("two")).await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        let mut reader = FrameReader::new(server);
        assert_eq!(reader.next_event().await.unwrap().unwrap().body, b"one");
        assert_eq!(reader.next_event().await.unwrap().unwrap().body, b"two");
        assert!(reader.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_times_out_on_stalled_peer() {
        // Peer never reads; the 16-byte pipe fills up.
        let (client, _server) = tokio::io::duplex(16);
        let mut writer = FrameWriter::new(client, Duration::from_millis(50));
        let result = writer.send(&Event::new(vec![b'x'; 64 * 1024])).await;
        assert!(matches!(result, Err(FrameError::Timeout(_))));
    }
}
