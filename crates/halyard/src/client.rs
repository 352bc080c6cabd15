//! The caller-facing client.
//!
//! A [`Client`] is cheap to clone and share; it owns the pool registry and
//! the statistics store. Every request runs on its own worker task, so a
//! caller that abandons the returned future abandons the worker too, and
//! the pool reclaims the slot through the checkout guard.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use tokio::sync::{mpsc, oneshot};

use crate::config::{RequestOptions, UploadOptions};
use crate::dest::Destination;
use crate::error::{HalyardError, HalyardResult};
use crate::ids::WorkerId;
use crate::pool::PoolRegistry;
use crate::request;
use crate::stats::{DestTotals, StatsStore};
use crate::streaming::{upload_channel, BodyReader, UploadHandle, UploadPart};

/// Request body.
pub struct Body {
    pub(crate) kind: BodyKind,
}

pub(crate) enum BodyKind {
    Empty,
    Full(Bytes),
    Streamed {
        rx: mpsc::Receiver<UploadPart>,
        chunked: bool,
    },
}

impl Body {
    pub fn empty() -> Self {
        Self {
            kind: BodyKind::Empty,
        }
    }

    /// A complete in-memory body; sent together with the head in one write.
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self {
            kind: BodyKind::Full(data.into()),
        }
    }

    /// A streamed upload. The handle feeds body parts under the configured
    /// window; the body value goes into the request.
    ///
    /// Chunked mode frames parts on the wire and allows trailers. Identity
    /// mode writes parts raw, which leaves `Content-Length` to the caller's
    /// own headers.
    pub fn streamed(opts: UploadOptions) -> (Self, UploadHandle) {
        let (handle, rx) = upload_channel(opts.window);
        (
            Self {
                kind: BodyKind::Streamed {
                    rx,
                    chunked: opts.chunked,
                },
            },
            handle,
        )
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BodyKind::Empty => f.write_str("Body::Empty"),
            BodyKind::Full(b) => write!(f, "Body::Full({} bytes)", b.len()),
            BodyKind::Streamed { chunked, .. } => {
                write!(f, "Body::Streamed(chunked={chunked})")
            }
        }
    }
}

/// Response body: complete, or a streamed reader in partial-download mode.
#[derive(Debug)]
pub enum ResponseBody {
    Complete(Bytes),
    Streamed(BodyReader),
}

/// One HTTP response.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl Response {
    pub(crate) fn new(
        status: StatusCode,
        version: Version,
        headers: HeaderMap,
        body: ResponseBody,
    ) -> Self {
        Self {
            status,
            version,
            headers,
            body,
        }
    }

    /// The complete body, when not in streamed mode.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Complete(bytes) => Some(bytes),
            ResponseBody::Streamed(_) => None,
        }
    }

    /// Take the streamed body reader, when in streamed mode.
    pub fn into_reader(self) -> Option<BodyReader> {
        match self.body {
            ResponseBody::Streamed(reader) => Some(reader),
            ResponseBody::Complete(_) => None,
        }
    }
}

/// Everything one worker needs to drive one exchange.
pub(crate) struct RequestJob {
    pub(crate) dest: Destination,
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
    pub(crate) options: RequestOptions,
    pub(crate) worker: WorkerId,
}

struct ClientInner {
    registry: Arc<PoolRegistry>,
    stats: Arc<StatsStore>,
}

/// Pool-backed HTTP/1.1 client.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder {
            stats_enabled: true,
        }
    }

    /// Perform one request/response exchange.
    ///
    /// With `options.download` set, this returns as soon as the response
    /// head is in and the body proven non-empty; the body then arrives
    /// through [`ResponseBody::Streamed`]. Otherwise the future resolves
    /// with the complete response.
    pub async fn request(
        &self,
        dest: Destination,
        method: Method,
        path: impl Into<String>,
        headers: HeaderMap,
        body: Body,
        options: RequestOptions,
    ) -> HalyardResult<Response> {
        let job = RequestJob {
            dest,
            method,
            path: path.into(),
            headers,
            body,
            options,
            worker: WorkerId::next(),
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        tokio::spawn(request::run(
            job,
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.stats),
            reply_tx,
        ));

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(HalyardError::Internal(
                "request worker terminated without a reply".to_string(),
            )),
        }
    }

    /// GET an absolute URL with default options.
    pub async fn get(&self, url: &str) -> HalyardResult<Response> {
        let (dest, path) = Destination::from_url(url)?;
        self.request(
            dest,
            Method::GET,
            path,
            HeaderMap::new(),
            Body::empty(),
            RequestOptions::default(),
        )
        .await
    }

    /// Human-readable statistics dump; reports "disabled" when statistics
    /// were turned off at construction.
    pub fn stats_dump(&self) -> String {
        self.inner.stats.dump()
    }

    /// Counter snapshot for one destination, `None` before its first open.
    pub fn destination_stats(&self, dest: &Destination) -> Option<DestTotals> {
        self.inner.stats.destination_totals(dest)
    }

    /// `(checked_out, idle)` connection counts for one destination.
    pub async fn connection_counts(&self, dest: &Destination) -> (usize, usize) {
        self.inner.registry.counts(dest).await
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

/// Builder for [`Client`].
#[derive(Debug)]
pub struct ClientBuilder {
    stats_enabled: bool,
}

impl ClientBuilder {
    /// Turn the statistics store into a no-op.
    pub fn disable_stats(mut self) -> Self {
        self.stats_enabled = false;
        self
    }

    pub fn build(self) -> Client {
        let stats = Arc::new(StatsStore::new(self.stats_enabled));
        let registry = Arc::new(PoolRegistry::new(Arc::clone(&stats)));
        Client {
            inner: Arc::new(ClientInner { registry, stats }),
        }
    }
}
