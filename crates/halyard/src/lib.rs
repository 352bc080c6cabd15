//! Pool-backed HTTP/1.1 client for server-side use.
//!
//! Halyard keeps one connection pool per `(host, port, tls)` destination,
//! hands keep-alive sockets back out under per-pool limits, and drives each
//! exchange on its own worker task. Bodies stream in either direction under
//! windowed backpressure.
//!
//! # Core pieces
//!
//! - **Pool manager**: one actor per destination with a bounded socket set.
//!   Checkout hands out an idle socket, a permit to connect, or refuses
//!   outright; nothing queues. Idle sockets are scanned for passive peer
//!   closes, idle timeout, and lifetime expiry.
//! - **Request state machine**: send, head parse (1xx tolerated), body in
//!   fixed-length / chunked / read-to-close framing, keep-alive decision,
//!   and one built-in retry when a reused socket turns out stale.
//! - **Statistics**: per-destination and per-connection counters fed by
//!   every open, close, and request event; optional, with a text dump.
//!
//! # Module Organization
//!
//! - [`client`]: the [`Client`] entry point, request bodies and responses
//! - [`config`]: pool policy and per-request options
//! - [`dest`]: destination keys
//! - [`error`]: the crate-wide error enum
//! - [`streaming`]: upload/download handles for partial transfers
//! - [`stats`]: counter snapshots exposed for observation
//!
//! # Example
//!
//! ```no_run
//! use halyard::Client;
//!
//! # async fn demo() -> halyard::HalyardResult<()> {
//! let client = Client::new();
//! let response = client.get("http://example.com/").await?;
//! println!("{} {:?}", response.status, response.body_bytes());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dest;
pub mod error;
mod chunked;
mod conn;
mod headers;
mod ids;
mod pool;
mod request;
pub mod stats;
pub mod streaming;
mod transport;

pub use client::{Body, Client, ClientBuilder, Response, ResponseBody};
pub use config::{
    ConnectOptions, DownloadOptions, PoolConfig, RequestOptions, UploadOptions,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_PART_SIZE, DEFAULT_UPLOAD_WINDOW,
};
pub use dest::Destination;
pub use error::{HalyardError, HalyardResult};
pub use headers::normalize_method;
pub use ids::{ConnId, WorkerId};
pub use stats::DestTotals;
pub use streaming::{BodyReader, UploadHandle};

// The `http` types appear throughout the public API; re-export the crate so
// callers do not have to pin a matching version themselves.
pub use http;
