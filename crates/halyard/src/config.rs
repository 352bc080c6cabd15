//! Configuration for pools and individual requests.

use std::net::IpAddr;
use std::time::Duration;

/// Default cap on concurrent sockets per destination.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Default cap on the byte size of one streamed body part.
pub const DEFAULT_PART_SIZE: usize = 64 * 1024;

/// Default credit window for streamed uploads (strict lock-step).
pub const DEFAULT_UPLOAD_WINDOW: usize = 1;

/// Per-destination pool policy.
///
/// Established by the first checkout for a destination and immutable for the
/// pool's lifetime; configuration supplied on later requests to the same
/// destination is ignored. `None` means no limit.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Cap on concurrent sockets (idle + checked out).
    pub max_connections: usize,
    /// Max time a connection may sit idle in the pool before it is closed.
    pub idle_timeout: Option<Duration>,
    /// Max successful exchanges one connection may serve before retirement.
    pub request_limit: Option<u64>,
    /// Max wall-clock age of a connection before retirement.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: None,
            request_limit: None,
            max_lifetime: None,
        }
    }
}

/// Extra socket options applied before the exchange begins.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Disable Nagle's algorithm on the socket.
    pub nodelay: bool,
    /// Bind the local side of the connection to a specific address.
    pub local_addr: Option<IpAddr>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            local_addr: None,
        }
    }
}

/// Streamed upload settings: the caller feeds body parts through a handle.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Number of un-consumed body parts the caller may have in flight.
    pub window: usize,
    /// Frame the body with chunked transfer encoding. Identity uploads
    /// require the caller to supply `Content-Length` themselves and may not
    /// carry trailers.
    pub chunked: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_UPLOAD_WINDOW,
            chunked: true,
        }
    }
}

/// Streamed download settings: the response body is spooled back in parts.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Number of un-acknowledged parts in flight; `None` is unbounded.
    /// Receiving a part is the acknowledgement that restores one credit.
    pub window: Option<usize>,
    /// Cap on the byte size of one body-part message. Large chunks are split
    /// across parts, small chunks are coalesced up to this size.
    pub part_size: usize,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            window: None,
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

/// Options recognized on a single request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// TCP connect (and TLS handshake) deadline. `None` is no deadline.
    pub connect_timeout: Option<Duration>,
    /// Extra socket options passed to the transport.
    pub connect_options: ConnectOptions,
    /// Overall deadline applied to every send and receive of the exchange.
    pub request_timeout: Option<Duration>,
    /// Additional attempts when a keep-alive peer closes under a send or
    /// head-read. The reused-socket case always gets one built-in retry on
    /// top of this.
    pub send_retry: usize,
    /// Enable streamed download. Streamed upload travels with the body
    /// instead: see [`crate::Body::streamed`].
    pub download: Option<DownloadOptions>,
    /// Pool policy, honored only by the checkout that creates the pool.
    pub pool: PoolConfig,
}
