//! Buffered connection wrapper.
//!
//! [`Conn`] owns one transport stream plus the read buffer the response
//! parser works from. It carries the bookkeeping the pool needs for its
//! retirement policies: open time and the number of exchanges served.

use std::io;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{HalyardError, HalyardResult};
use crate::ids::ConnId;
use crate::transport::Stream;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug)]
pub(crate) struct Conn {
    pub(crate) id: ConnId,
    stream: Stream,
    buf: BytesMut,
    pub(crate) open_time: Instant,
    /// Exchanges this socket has been lent out for, the in-flight one
    /// included. The pool increments it on reuse checkout.
    pub(crate) request_count: u64,
}

impl Conn {
    pub(crate) fn new(stream: Stream) -> Self {
        Self {
            id: ConnId::next(),
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            open_time: Instant::now(),
            request_count: 1,
        }
    }

    pub(crate) fn age(&self) -> Duration {
        self.open_time.elapsed()
    }

    /// Unparsed bytes already read from the socket.
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn consume(&mut self, n: usize) {
        let _ = self.buf.split_to(n);
    }

    /// Read more bytes from the socket into the buffer. Returns the number
    /// of bytes read; zero means the peer closed.
    pub(crate) async fn fill(&mut self) -> io::Result<usize> {
        self.buf.reserve(READ_CHUNK);
        self.stream.read_buf(&mut self.buf).await
    }

    pub(crate) async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    /// Read one CRLF-terminated line, CRLF excluded. Used for chunk size
    /// lines, so overruns and EOF map to chunk-level errors.
    pub(crate) async fn read_line(&mut self, max: usize) -> HalyardResult<Bytes> {
        loop {
            if let Some(idx) = find_crlf(&self.buf) {
                let line = self.buf.split_to(idx).freeze();
                self.consume(2);
                return Ok(line);
            }
            if self.buf.len() > max {
                return Err(HalyardError::InvalidChunk(format!(
                    "size line exceeds {max} bytes"
                )));
            }
            if self.fill().await? == 0 {
                return Err(HalyardError::ConnectionClosed);
            }
        }
    }

    /// Read exactly `n` bytes, buffering as needed.
    pub(crate) async fn read_exact_bytes(&mut self, n: usize) -> HalyardResult<Bytes> {
        while self.buf.len() < n {
            if self.fill().await? == 0 {
                return Err(HalyardError::ConnectionClosed);
            }
        }
        Ok(self.buf.split_to(n).freeze())
    }

    /// Read up to `max` bytes, returning whatever is available first. An
    /// empty result means the peer closed.
    pub(crate) async fn read_some(&mut self, max: usize) -> HalyardResult<Bytes> {
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Ok(Bytes::new());
        }
        let take = self.buf.len().min(max);
        Ok(self.buf.split_to(take).freeze())
    }

    /// Whether the socket is no longer reusable while idle. Leftover
    /// buffered bytes condemn it just like readable garbage on the wire:
    /// nothing may arrive between serialized exchanges.
    pub(crate) fn probe_closed(&self) -> bool {
        !self.buf.is_empty() || self.stream.probe_closed()
    }

    pub(crate) async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
