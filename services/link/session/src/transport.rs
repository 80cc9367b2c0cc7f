//! TCP transport and stream framing for link connections.
//!
//! Frames travel over the byte stream size-prefixed: a little-endian `u32`
//! with the frame length, followed by the frame itself.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use link_wire::{read_size_prefix, SIZE_PREFIX_LEN};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

/// Transport-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is not open (still connecting, or already closed)
    #[error("connection not open")]
    NotReady,

    /// The server refused the connection
    #[error("connection refused: {0}")]
    Refused(String),

    /// The connection was reset or aborted by the peer
    #[error("connection reset: {0}")]
    Reset(String),

    /// Connecting took longer than the configured timeout
    #[error("connection timed out")]
    Timeout,

    /// The peer closed the connection
    #[error("connection closed")]
    Closed,

    /// A frame exceeded the configured size limit
    #[error("frame of {0} bytes exceeds the size limit")]
    FrameTooLarge(usize),

    /// Any other I/O failure
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused => TransportError::Refused(e.to_string()),
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                TransportError::Reset(e.to_string())
            }
            ErrorKind::TimedOut => TransportError::Timeout,
            ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(e.to_string()),
        }
    }
}

/// Connect to a `host:port` address
pub async fn connect_tcp(addr: &str) -> tokio::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Splits an inbound byte stream into frames
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder that rejects frames above `max_frame_size`
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Take one complete frame from the front of `buf`, if present
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, TransportError> {
        let Some(frame_len) = read_size_prefix(buf) else {
            return Ok(None);
        };

        if frame_len > self.max_frame_size {
            return Err(TransportError::FrameTooLarge(frame_len));
        }

        if buf.len() < SIZE_PREFIX_LEN + frame_len {
            return Ok(None);
        }

        buf.advance(SIZE_PREFIX_LEN);
        Ok(Some(buf.split_to(frame_len).freeze()))
    }
}

/// Write one size-prefixed frame
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &[u8],
    max_frame_size: usize,
) -> Result<(), TransportError> {
    if frame.len() > max_frame_size {
        return Err(TransportError::FrameTooLarge(frame.len()));
    }

    let mut buf = BytesMut::with_capacity(SIZE_PREFIX_LEN + frame.len());
    buf.put_u32_le(frame.len() as u32);
    buf.put_slice(frame);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    trace!("Wrote frame of {} bytes", frame.len());
    Ok(())
}

/// Read the next frame, buffering partial reads in `buffer`.
///
/// Cancel-safe: bytes already read stay in `buffer` for the next call.
pub async fn recv_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
    buffer: &mut BytesMut,
) -> Result<Bytes, TransportError> {
    loop {
        if let Some(frame) = decoder.decode(buffer)? {
            return Ok(frame);
        }

        let bytes_read = reader.read_buf(buffer).await?;
        if bytes_read == 0 {
            return Err(TransportError::Closed);
        }

        trace!(
            "Read {} bytes, buffer now has {} bytes",
            bytes_read,
            buffer.len()
        );
    }
}
