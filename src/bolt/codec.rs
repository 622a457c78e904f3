//! Bolt chunk framing.
//!
//! Messages are split into chunks with a 2-byte big-endian length prefix
//! and terminated by a zero-length chunk. Inbound, [`BoltCodec`] assembles
//! chunks into one frame per message; outbound, [`ChunkedOutput`] buffers
//! encoded responses and frames them once each message is complete.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::error::{BoltError, BoltResult};
use super::message::MessageSink;

/// Maximum chunk size (16KB)
pub const MAX_CHUNK_SIZE: usize = 16384;

/// Default limit for one assembled inbound message (16MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// End of message marker (0x00 0x00)
pub const END_MARKER: [u8; 2] = [0x00, 0x00];

/// Split `data` into chunks of at most `max_chunk_size` bytes and append
/// them, followed by the end marker, to `dst`.
pub fn write_chunked(data: &[u8], max_chunk_size: usize, dst: &mut BytesMut) {
    let max_chunk_size = max_chunk_size.clamp(1, u16::MAX as usize);
    dst.reserve(data.len() + 2 * (data.len() / max_chunk_size + 2));
    for chunk in data.chunks(max_chunk_size) {
        dst.put_u16(chunk.len() as u16);
        dst.put_slice(chunk);
    }
    dst.put_slice(&END_MARKER);
}

/// Chunk framing codec. Decodes into complete message frames; encodes
/// complete message bodies into chunks.
#[derive(Debug)]
pub struct BoltCodec {
    max_message_size: usize,
    max_chunk_size: usize,
    /// Chunks of the message being assembled
    message_buffer: BytesMut,
}

impl BoltCodec {
    /// Create a new codec with default settings.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_MESSAGE_SIZE, MAX_CHUNK_SIZE)
    }

    pub fn with_limits(max_message_size: usize, max_chunk_size: usize) -> Self {
        Self {
            max_message_size,
            max_chunk_size,
            message_buffer: BytesMut::with_capacity(4096),
        }
    }
}

impl Default for BoltCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BoltCodec {
    type Item = Bytes;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < 2 {
                return Ok(None);
            }

            let chunk_size = u16::from_be_bytes([src[0], src[1]]) as usize;

            if chunk_size == 0 {
                src.advance(2);
                if self.message_buffer.is_empty() {
                    // NOOP keep-alive
                    continue;
                }
                let frame = self.message_buffer.split().freeze();
                trace!(bytes = frame.len(), "message frame assembled");
                return Ok(Some(frame));
            }

            if self.message_buffer.len() + chunk_size > self.max_message_size {
                return Err(BoltError::MessageTooLarge {
                    size: self.message_buffer.len() + chunk_size,
                    max: self.max_message_size,
                });
            }

            if src.len() < 2 + chunk_size {
                src.reserve(2 + chunk_size - src.len());
                return Ok(None);
            }

            src.advance(2);
            self.message_buffer.extend_from_slice(&src[..chunk_size]);
            src.advance(chunk_size);
        }
    }
}

impl Encoder<Bytes> for BoltCodec {
    type Error = BoltError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_chunked(&item, self.max_chunk_size, dst);
        Ok(())
    }
}

/// Outbound message sink backed by a channel to the socket writer task.
///
/// Completed messages accumulate in `pending` as chunked bytes and are
/// handed off on [`MessageSink::flush`], or automatically once `pending`
/// grows past the flush threshold.
///
/// The channel is bounded: a flush blocks while the socket writer is
/// behind, so the output must be driven from a blocking thread.
#[derive(Debug)]
pub struct ChunkedOutput {
    current: BytesMut,
    pending: BytesMut,
    max_chunk_size: usize,
    flush_threshold: usize,
    tx: mpsc::Sender<Bytes>,
}

impl ChunkedOutput {
    pub fn new(tx: mpsc::Sender<Bytes>, max_chunk_size: usize, flush_threshold: usize) -> Self {
        Self {
            current: BytesMut::with_capacity(1024),
            pending: BytesMut::with_capacity(flush_threshold.min(64 * 1024)),
            max_chunk_size,
            flush_threshold,
            tx,
        }
    }

    /// Bytes of completed messages not yet flushed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the socket writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl MessageSink for ChunkedOutput {
    fn begin_message(&mut self) {
        self.current.clear();
    }

    fn buffer(&mut self) -> &mut BytesMut {
        &mut self.current
    }

    fn message_succeeded(&mut self) -> BoltResult<()> {
        write_chunked(&self.current, self.max_chunk_size, &mut self.pending);
        self.current.clear();
        if self.pending.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    fn message_failed(&mut self) {
        self.current.clear();
    }

    fn flush(&mut self) -> BoltResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let bytes = self.pending.split().freeze();
        trace!(bytes = bytes.len(), "flushing output");
        self.tx.blocking_send(bytes).map_err(|_| BoltError::OutputClosed)
    }
}
