//! Error types for the halyard client.
//!
//! Every failure a request can produce is a variant of [`HalyardError`];
//! workers never surface panics to the caller. Transport-level faults arrive
//! as [`HalyardError::Io`], everything else maps a specific protocol or
//! pool condition.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for halyard operations.
#[derive(Error, Debug)]
pub enum HalyardError {
    /// The destination pool is at `max_connections` with no idle socket.
    ///
    /// Recoverable at the caller level: nothing was sent, retrying later is
    /// always safe.
    #[error("connection pool at capacity, retry later")]
    RetryLater,

    /// TCP connect (or TLS handshake) did not complete within the deadline.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The overall request deadline elapsed while waiting on the peer.
    ///
    /// The connection is closed and never retried: the request may already
    /// have had side effects on the server.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The peer closed the connection and all retry attempts are exhausted.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The response carries neither `Content-Length` nor chunked encoding,
    /// and the `Connection` header does not legitimize read-to-close framing.
    #[error("response has no content length and the connection is not closing")]
    NoContentLength,

    /// Trailers were supplied on an upload that is not chunked.
    #[error("trailers require chunked transfer encoding")]
    TrailersNotAllowed,

    /// Malformed chunk size line or chunk terminator. Fatal, never retried.
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    /// Malformed trailer section after the last chunk.
    #[error("invalid trailer: {0}")]
    BadTrailer(String),

    /// The response head could not be parsed as HTTP/1.x.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request inputs could not be turned into a valid HTTP/1.1 exchange.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A streamed upload was dropped before its end-of-body marker.
    #[error("upload aborted before end of body")]
    UploadAborted,

    /// Anything else that escaped a worker, with context.
    #[error("internal error: {0}")]
    Internal(String),

    /// Transport-level I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias used throughout the crate.
pub type HalyardResult<T> = Result<T, HalyardError>;

/// Whether an I/O error means the peer closed the connection.
///
/// These are the only send/read failures eligible for the stale-keep-alive
/// retry; any other I/O error is immediately fatal.
pub fn is_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}
