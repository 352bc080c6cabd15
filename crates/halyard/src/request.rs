//! The request state machine.
//!
//! One worker drives one HTTP/1.1 exchange: check a socket out (or open
//! one), send the head and body, parse the response head, read the body in
//! one of three framings, decide keep-alive, and check the socket back in.
//! The only retryable failure is a peer close during send or head-read,
//! covering the race where a keep-alive socket died just before we wrote;
//! each retry opens a brand-new socket against the already-reserved slot.

use std::future::Future;
use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode, Version};
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

use crate::chunked;
use crate::client::{BodyKind, RequestJob, Response, ResponseBody};
use crate::conn::Conn;
use crate::error::{is_closed, HalyardError, HalyardResult};
use crate::headers::{self, BodyFraming, CloseClass};
use crate::pool::{CheckedOut, CheckoutOutcome, PoolRegistry};
use crate::stats::StatsStore;
use crate::streaming::{part_channel, BodyPart, BodyReader, PartSender, UploadPart};
use crate::transport::Stream;

const MAX_HEADERS: usize = 100;
const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_TRAILER_BYTES: usize = 16 * 1024;
const MAX_SIZE_LINE: usize = 1024;
/// Informational (1xx) heads tolerated before one final status line.
const MAX_INFORMATIONAL: usize = 8;
/// Read granularity for read-to-close bodies collected in one piece.
const DRAIN_CHUNK: usize = 64 * 1024;

pub(crate) type ReplySender = oneshot::Sender<HalyardResult<Response>>;

/// How one attempt over one socket ended.
enum AttemptError {
    /// Peer closed under a send or head-read; retryable while attempts last.
    Closed,
    /// The overall deadline elapsed; never retried.
    Timeout,
    /// The requester vanished mid-stream; no response is produced.
    CallerGone,
    /// Anything else; surfaces to the caller as-is.
    Fatal(HalyardError),
}

/// What a successful attempt produced.
enum Disposition {
    /// A complete response still to be delivered, and the socket's fate.
    Deliver(Response, CloseClass),
    /// The response went out through the streaming handle already.
    Delivered(CloseClass),
    /// The stream failed after delivery; stats and socket close are already
    /// recorded, only the slot remains to release.
    StreamFailed,
}

/// Body left to spool after the head phase proved it non-empty.
enum Primed {
    Length(u64),
    Chunked { next_size: u64 },
    Infinite { first: Bytes },
}

/// Drive one exchange to completion and deliver the result.
pub(crate) async fn run(
    job: RequestJob,
    registry: Arc<PoolRegistry>,
    stats: Arc<StatsStore>,
    reply: ReplySender,
) {
    let deadline = job.options.request_timeout.map(|t| Instant::now() + t);
    let mut exchange = Exchange {
        job,
        stats,
        deadline,
        body_consumed: false,
    };
    let mut reply = Some(reply);
    let outcome = exchange.execute(&registry, &mut reply).await;

    match (outcome, reply.take()) {
        (Ok(Some(response)), Some(tx)) => {
            let _ = tx.send(Ok(response));
        }
        (Err(e), Some(tx)) => {
            let _ = tx.send(Err(e));
        }
        (Ok(_), _) => {}
        (Err(e), None) => {
            // The terminal error already went out through the body stream.
            debug!(error = %e, "request failed after the response was delivered");
        }
    }
}

struct Exchange {
    job: RequestJob,
    stats: Arc<StatsStore>,
    deadline: Option<Instant>,
    /// Once a streamed upload part has been taken off the caller's channel
    /// it cannot be replayed, which disqualifies further retries.
    body_consumed: bool,
}

impl Exchange {
    async fn execute(
        &mut self,
        registry: &PoolRegistry,
        reply: &mut Option<ReplySender>,
    ) -> HalyardResult<Option<Response>> {
        let (outcome, handle) = registry
            .checkout(&self.job.dest, &self.job.options.pool)
            .await?;
        let (mut current, reused) = match outcome {
            CheckoutOutcome::Reuse(conn) => (Some(conn), true),
            CheckoutOutcome::Connect => (None, false),
            CheckoutOutcome::Reject => return Err(HalyardError::RetryLater),
        };
        let mut guard = CheckedOut::new(
            handle,
            Arc::clone(&self.stats),
            current.as_ref().map(|c| c.id),
        );

        // A reused socket gets one built-in extra attempt: the peer may have
        // closed it just before our first write.
        let mut attempts = self.job.options.send_retry + if reused { 2 } else { 1 };

        loop {
            let mut conn = match current.take() {
                Some(conn) => conn,
                None => {
                    match Stream::connect(
                        &self.job.dest,
                        &self.job.options.connect_options,
                        self.job.options.connect_timeout,
                    )
                    .await
                    {
                        Ok(stream) => {
                            let conn = Conn::new(stream);
                            self.stats.open_connection(&self.job.dest, conn.id);
                            guard.set_conn(conn.id);
                            conn
                        }
                        Err(e) => {
                            self.stats.open_connection_error(&self.job.dest);
                            guard.release().await;
                            return Err(e);
                        }
                    }
                }
            };
            attempts -= 1;
            self.stats
                .start_request(&self.job.dest, conn.id, self.job.worker);

            match self.attempt(&mut conn, reply).await {
                Ok(Disposition::Deliver(response, class)) => {
                    self.finish(conn, guard, class).await;
                    return Ok(Some(response));
                }
                Ok(Disposition::Delivered(class)) => {
                    self.finish(conn, guard, class).await;
                    return Ok(None);
                }
                Ok(Disposition::StreamFailed) => {
                    conn.shutdown().await;
                    guard.release().await;
                    return Ok(None);
                }
                Err(AttemptError::Closed) => {
                    self.stats.close_connection_remote(conn.id);
                    drop(conn);
                    if attempts > 0 && !self.body_consumed {
                        debug!(
                            dest = %self.job.dest,
                            attempts_left = attempts,
                            "stale keep-alive, retrying on a fresh socket"
                        );
                        continue;
                    }
                    guard.release().await;
                    return Err(HalyardError::ConnectionClosed);
                }
                Err(AttemptError::Timeout) => {
                    self.stats.close_connection_timeout(self.job.worker);
                    conn.shutdown().await;
                    guard.release().await;
                    return Err(HalyardError::Timeout(
                        self.job.options.request_timeout.unwrap_or_default(),
                    ));
                }
                Err(AttemptError::CallerGone) => {
                    debug!(dest = %self.job.dest, "requester gone, abandoning exchange");
                    self.stats.close_connection_local(conn.id);
                    guard.release().await;
                    return Ok(None);
                }
                Err(AttemptError::Fatal(e)) => {
                    if matches!(e, HalyardError::ConnectionClosed) {
                        self.stats.close_connection_remote(conn.id);
                    } else {
                        self.stats.close_connection_local(conn.id);
                    }
                    guard.release().await;
                    return Err(e);
                }
            }
        }
    }

    /// Settle the socket after a successful exchange.
    async fn finish(&self, mut conn: Conn, guard: CheckedOut, class: CloseClass) {
        self.stats.end_request(conn.id);
        match class {
            CloseClass::Keep => guard.checkin(conn).await,
            CloseClass::Local => {
                self.stats.close_connection_local(conn.id);
                conn.shutdown().await;
                guard.release().await;
            }
            CloseClass::Remote => {
                self.stats.close_connection_remote(conn.id);
                guard.release().await;
            }
        }
    }

    /// One full send/receive cycle over one socket.
    async fn attempt(
        &mut self,
        conn: &mut Conn,
        reply: &mut Option<ReplySender>,
    ) -> Result<Disposition, AttemptError> {
        self.send_request(conn).await?;
        let (version, status, mut resp_headers) = read_head(conn, self.deadline).await?;
        trace!(status = %status, version = ?version, "response head received");

        if !headers::has_body(&self.job.method, status, &resp_headers) {
            let class = headers::keep_alive(version, &self.job.headers, &resp_headers);
            let response = Response::new(
                status,
                version,
                resp_headers,
                ResponseBody::Complete(Bytes::new()),
            );
            return Ok(Disposition::Deliver(response, class));
        }

        let framing = headers::body_framing(&resp_headers).map_err(AttemptError::Fatal)?;
        if framing == BodyFraming::ReadToClose {
            ensure_read_to_close_allowed(version, &resp_headers)?;
        }

        if self.job.options.download.is_some() {
            self.stream_download(conn, version, status, resp_headers, framing, reply)
                .await
        } else {
            let deadline = self.deadline;
            let body = match framing {
                BodyFraming::Length(n) => {
                    let n = usize::try_from(n).map_err(|_| {
                        AttemptError::Fatal(HalyardError::InvalidResponse(
                            "content-length exceeds addressable memory".to_string(),
                        ))
                    })?;
                    h_f(deadline, conn.read_exact_bytes(n)).await?
                }
                BodyFraming::Chunked => {
                    let (body, trailers) = read_chunked(conn, deadline).await?;
                    if let Some(trailers) = trailers {
                        for (name, value) in trailers.iter() {
                            resp_headers.append(name.clone(), value.clone());
                        }
                    }
                    body
                }
                BodyFraming::ReadToClose => {
                    let mut out = BytesMut::new();
                    loop {
                        let data = h_f(deadline, conn.read_some(DRAIN_CHUNK)).await?;
                        if data.is_empty() {
                            break;
                        }
                        out.extend_from_slice(&data);
                    }
                    out.freeze()
                }
            };

            let class = headers::keep_alive(version, &self.job.headers, &resp_headers);
            let response =
                Response::new(status, version, resp_headers, ResponseBody::Complete(body));
            Ok(Disposition::Deliver(response, class))
        }
    }

    /// Write the request head (plus any complete body, in the same call) and
    /// run the upload loop for streamed bodies.
    async fn send_request(&mut self, conn: &mut Conn) -> Result<(), AttemptError> {
        let (body_len, chunked_upload) = match &self.job.body.kind {
            BodyKind::Empty => (Some(0u64), false),
            BodyKind::Full(bytes) => (Some(bytes.len() as u64), false),
            BodyKind::Streamed { chunked, .. } => (None, *chunked),
        };
        let mut head = headers::format_request_head(
            &self.job.method,
            &self.job.path,
            &self.job.headers,
            &self.job.dest,
            body_len,
            chunked_upload,
        );
        if let BodyKind::Full(bytes) = &self.job.body.kind {
            head.extend_from_slice(bytes);
        }
        io_r(self.deadline, conn.write_all(&head)).await?;

        if matches!(self.job.body.kind, BodyKind::Streamed { .. }) {
            self.run_upload(conn).await?;
        }
        Ok(())
    }

    /// Streamed upload: drain the caller's channel onto the wire. Receiving
    /// a part is what re-credits the caller's window, one for one.
    async fn run_upload(&mut self, conn: &mut Conn) -> Result<(), AttemptError> {
        let deadline = self.deadline;
        let BodyKind::Streamed { rx, chunked } = &mut self.job.body.kind else {
            return Ok(());
        };
        let chunked = *chunked;

        loop {
            let part = bounded(deadline, rx.recv()).await?;
            self.body_consumed = true;
            match part {
                None => return Err(AttemptError::Fatal(HalyardError::UploadAborted)),
                Some(UploadPart::Data(data)) => {
                    if chunked {
                        let mut framed = BytesMut::with_capacity(data.len() + 16);
                        chunked::encode_chunk(&mut framed, &data);
                        io_r(deadline, conn.write_all(&framed)).await?;
                    } else {
                        io_r(deadline, conn.write_all(&data)).await?;
                    }
                }
                Some(UploadPart::Eob) => {
                    if chunked {
                        let mut framed = BytesMut::new();
                        chunked::encode_last_chunk(&mut framed, None);
                        io_r(deadline, conn.write_all(&framed)).await?;
                    }
                    return Ok(());
                }
                Some(UploadPart::Trailers(trailers)) => {
                    if !chunked {
                        return Err(AttemptError::Fatal(HalyardError::TrailersNotAllowed));
                    }
                    let mut framed = BytesMut::new();
                    chunked::encode_last_chunk(&mut framed, Some(&trailers));
                    io_r(deadline, conn.write_all(&framed)).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Streamed download: deliver the response with a body handle as soon as
    /// the body is proven non-empty, then spool parts under the window.
    async fn stream_download(
        &mut self,
        conn: &mut Conn,
        version: Version,
        status: StatusCode,
        mut resp_headers: HeaderMap,
        framing: BodyFraming,
        reply: &mut Option<ReplySender>,
    ) -> Result<Disposition, AttemptError> {
        let deadline = self.deadline;
        let opts = self.job.options.download.clone().unwrap_or_default();
        let part_size = opts.part_size.max(1);

        let primed = match framing {
            BodyFraming::Length(0) => None,
            BodyFraming::Length(n) => Some(Primed::Length(n)),
            BodyFraming::Chunked => {
                let line = h_f(deadline, conn.read_line(MAX_SIZE_LINE)).await?;
                let size = chunked::parse_size_line(&line).map_err(AttemptError::Fatal)?;
                if size == 0 {
                    if let Some(trailers) = read_trailers(conn, deadline).await? {
                        for (name, value) in trailers.iter() {
                            resp_headers.append(name.clone(), value.clone());
                        }
                    }
                    None
                } else {
                    Some(Primed::Chunked { next_size: size })
                }
            }
            BodyFraming::ReadToClose => {
                let first = h_f(deadline, conn.read_some(part_size)).await?;
                if first.is_empty() {
                    None
                } else {
                    Some(Primed::Infinite { first })
                }
            }
        };

        let class = headers::keep_alive(version, &self.job.headers, &resp_headers);

        let Some(primed) = primed else {
            // Empty body: no stream to hand out, deliver a complete response.
            let response = Response::new(
                status,
                version,
                resp_headers,
                ResponseBody::Complete(Bytes::new()),
            );
            return Ok(Disposition::Deliver(response, class));
        };

        let (tx, rx) = part_channel(opts.window);
        let response = Response::new(
            status,
            version,
            resp_headers,
            ResponseBody::Streamed(BodyReader::new(rx)),
        );
        match reply.take() {
            Some(sender) => {
                if sender.send(Ok(response)).is_err() {
                    return Err(AttemptError::CallerGone);
                }
            }
            None => {
                return Err(AttemptError::Fatal(HalyardError::Internal(
                    "response delivered twice".to_string(),
                )))
            }
        }

        match self.spool(conn, &tx, primed, part_size).await {
            Ok(trailers) => {
                let _ = tx.send(BodyPart::Eob(trailers)).await;
                Ok(Disposition::Delivered(class))
            }
            Err(AttemptError::CallerGone) => {
                debug!(conn = %conn.id, "download reader dropped, abandoning body");
                self.stats.close_connection_local(conn.id);
                Ok(Disposition::StreamFailed)
            }
            Err(AttemptError::Timeout) => {
                self.stats.close_connection_timeout(self.job.worker);
                let elapsed = self.job.options.request_timeout.unwrap_or_default();
                let _ = tx.send(BodyPart::Failed(HalyardError::Timeout(elapsed))).await;
                Ok(Disposition::StreamFailed)
            }
            Err(AttemptError::Closed) => {
                self.stats.close_connection_remote(conn.id);
                let _ = tx
                    .send(BodyPart::Failed(HalyardError::ConnectionClosed))
                    .await;
                Ok(Disposition::StreamFailed)
            }
            Err(AttemptError::Fatal(e)) => {
                if matches!(e, HalyardError::ConnectionClosed) {
                    self.stats.close_connection_remote(conn.id);
                } else {
                    self.stats.close_connection_local(conn.id);
                }
                let _ = tx.send(BodyPart::Failed(e)).await;
                Ok(Disposition::StreamFailed)
            }
        }
    }

    /// Feed body parts through the window until end of body; returns the
    /// trailer set (empty except after chunked bodies that carried some).
    async fn spool(
        &mut self,
        conn: &mut Conn,
        tx: &PartSender,
        primed: Primed,
        part_size: usize,
    ) -> Result<HeaderMap, AttemptError> {
        let deadline = self.deadline;
        match primed {
            Primed::Length(total) => {
                let mut remaining = total;
                while remaining > 0 {
                    let want = part_size.min(usize::try_from(remaining).unwrap_or(part_size));
                    let data = h_f(deadline, conn.read_some(want)).await?;
                    if data.is_empty() {
                        return Err(AttemptError::Fatal(HalyardError::ConnectionClosed));
                    }
                    remaining -= data.len() as u64;
                    if tx.send(BodyPart::Data(data)).await.is_err() {
                        return Err(AttemptError::CallerGone);
                    }
                }
                Ok(HeaderMap::new())
            }
            Primed::Chunked { mut next_size } => {
                let mut acc = BytesMut::new();
                loop {
                    let mut rem = usize::try_from(next_size).map_err(|_| {
                        AttemptError::Fatal(HalyardError::InvalidChunk(
                            "chunk size exceeds addressable memory".to_string(),
                        ))
                    })?;
                    while rem > 0 {
                        let want = rem.min(part_size - acc.len());
                        let data = h_f(deadline, conn.read_exact_bytes(want)).await?;
                        rem -= data.len();
                        acc.extend_from_slice(&data);
                        if acc.len() == part_size {
                            if tx.send(BodyPart::Data(acc.split().freeze())).await.is_err() {
                                return Err(AttemptError::CallerGone);
                            }
                        }
                    }
                    chunk_terminator(conn, deadline).await?;

                    let line = h_f(deadline, conn.read_line(MAX_SIZE_LINE)).await?;
                    next_size = chunked::parse_size_line(&line).map_err(AttemptError::Fatal)?;
                    if next_size == 0 {
                        if !acc.is_empty()
                            && tx.send(BodyPart::Data(acc.freeze())).await.is_err()
                        {
                            return Err(AttemptError::CallerGone);
                        }
                        let trailers = read_trailers(conn, deadline).await?;
                        return Ok(trailers.unwrap_or_default());
                    }
                }
            }
            Primed::Infinite { first } => {
                if tx.send(BodyPart::Data(first)).await.is_err() {
                    return Err(AttemptError::CallerGone);
                }
                loop {
                    let data = h_f(deadline, conn.read_some(part_size)).await?;
                    if data.is_empty() {
                        return Ok(HeaderMap::new());
                    }
                    if tx.send(BodyPart::Data(data)).await.is_err() {
                        return Err(AttemptError::CallerGone);
                    }
                }
            }
        }
    }
}

/// Read heads until a non-informational status line arrives; 1xx heads are
/// consumed and discarded whether or not we invited them.
async fn read_head(
    conn: &mut Conn,
    deadline: Option<Instant>,
) -> Result<(Version, StatusCode, HeaderMap), AttemptError> {
    let mut informational = 0;
    loop {
        let parsed = {
            let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut resp = httparse::Response::new(&mut raw);
            match resp.parse(conn.buffer()) {
                Ok(httparse::Status::Complete(used)) => {
                    let version = match resp.version {
                        Some(0) => Version::HTTP_10,
                        _ => Version::HTTP_11,
                    };
                    let code = resp.code.ok_or_else(|| {
                        AttemptError::Fatal(HalyardError::InvalidResponse(
                            "missing status code".to_string(),
                        ))
                    })?;
                    let status = StatusCode::from_u16(code).map_err(|_| {
                        AttemptError::Fatal(HalyardError::InvalidResponse(format!(
                            "status code {code} out of range"
                        )))
                    })?;
                    let headers = headers::headers_from_httparse(resp.headers)
                        .map_err(|e| AttemptError::Fatal(HalyardError::InvalidResponse(e)))?;
                    Some((used, version, status, headers))
                }
                Ok(httparse::Status::Partial) => None,
                Err(e) => {
                    return Err(AttemptError::Fatal(HalyardError::InvalidResponse(
                        e.to_string(),
                    )))
                }
            }
        };

        if let Some((used, version, status, headers)) = parsed {
            conn.consume(used);
            if status.is_informational() {
                informational += 1;
                if informational > MAX_INFORMATIONAL {
                    return Err(AttemptError::Fatal(HalyardError::InvalidResponse(
                        "too many informational responses".to_string(),
                    )));
                }
                trace!(status = %status, "discarding informational response");
                continue;
            }
            return Ok((version, status, headers));
        }

        if conn.buffered() > MAX_HEAD_BYTES {
            return Err(AttemptError::Fatal(HalyardError::InvalidResponse(
                "response head too large".to_string(),
            )));
        }
        if io_r(deadline, conn.fill()).await? == 0 {
            return Err(AttemptError::Closed);
        }
    }
}

/// Decode a whole chunked body into one buffer, trailers included.
async fn read_chunked(
    conn: &mut Conn,
    deadline: Option<Instant>,
) -> Result<(Bytes, Option<HeaderMap>), AttemptError> {
    let mut body = BytesMut::new();
    loop {
        let line = h_f(deadline, conn.read_line(MAX_SIZE_LINE)).await?;
        let size = chunked::parse_size_line(&line).map_err(AttemptError::Fatal)?;
        if size == 0 {
            let trailers = read_trailers(conn, deadline).await?;
            return Ok((body.freeze(), trailers));
        }
        let size = usize::try_from(size).map_err(|_| {
            AttemptError::Fatal(HalyardError::InvalidChunk(
                "chunk size exceeds addressable memory".to_string(),
            ))
        })?;
        let data = h_f(deadline, conn.read_exact_bytes(size + 2)).await?;
        if &data[size..] != b"\r\n" {
            return Err(AttemptError::Fatal(HalyardError::InvalidChunk(
                "chunk data not terminated by CRLF".to_string(),
            )));
        }
        body.extend_from_slice(&data[..size]);
    }
}

/// The two bytes after chunk data must be CRLF or the chunk is invalid.
async fn chunk_terminator(conn: &mut Conn, deadline: Option<Instant>) -> Result<(), AttemptError> {
    let crlf = h_f(deadline, conn.read_exact_bytes(2)).await?;
    if &crlf[..] != b"\r\n" {
        return Err(AttemptError::Fatal(HalyardError::InvalidChunk(
            "chunk data not terminated by CRLF".to_string(),
        )));
    }
    Ok(())
}

/// Parse the trailer section after the zero chunk, up to the blank line.
async fn read_trailers(
    conn: &mut Conn,
    deadline: Option<Instant>,
) -> Result<Option<HeaderMap>, AttemptError> {
    loop {
        let parsed = {
            let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
            match httparse::parse_headers(conn.buffer(), &mut raw) {
                Ok(httparse::Status::Complete((used, parsed))) => {
                    let map = headers::headers_from_httparse(parsed)
                        .map_err(|e| AttemptError::Fatal(HalyardError::BadTrailer(e)))?;
                    Some((used, map))
                }
                Ok(httparse::Status::Partial) => None,
                Err(e) => {
                    return Err(AttemptError::Fatal(HalyardError::BadTrailer(e.to_string())))
                }
            }
        };

        if let Some((used, map)) = parsed {
            conn.consume(used);
            return Ok(if map.is_empty() { None } else { Some(map) });
        }
        if conn.buffered() > MAX_TRAILER_BYTES {
            return Err(AttemptError::Fatal(HalyardError::BadTrailer(
                "trailer section too large".to_string(),
            )));
        }
        let filled = match bounded(deadline, conn.fill()).await? {
            Ok(n) => n,
            Err(e) if is_closed(&e) => {
                return Err(AttemptError::Fatal(HalyardError::ConnectionClosed))
            }
            Err(e) => return Err(AttemptError::Fatal(e.into())),
        };
        if filled == 0 {
            return Err(AttemptError::Fatal(HalyardError::ConnectionClosed));
        }
    }
}

/// Read-to-close framing is only legitimate when the connection is actually
/// closing: `Connection: close` on HTTP/1.1, or an HTTP/1.0 server that did
/// not promise keep-alive.
fn ensure_read_to_close_allowed(
    version: Version,
    resp_headers: &HeaderMap,
) -> Result<(), AttemptError> {
    let allowed = if version == Version::HTTP_11 {
        headers::connection_has_token(resp_headers, "close")
    } else {
        !headers::connection_has_token(resp_headers, "keep-alive")
    };
    if allowed {
        Ok(())
    } else {
        Err(AttemptError::Fatal(HalyardError::NoContentLength))
    }
}

/// Bound a future by the exchange deadline.
async fn bounded<T>(
    deadline: Option<Instant>,
    fut: impl Future<Output = T>,
) -> Result<T, AttemptError> {
    match deadline {
        Some(at) => timeout_at(at, fut).await.map_err(|_| AttemptError::Timeout),
        None => Ok(fut.await),
    }
}

/// I/O in the send/head phase: a peer close here is retryable.
async fn io_r<T>(
    deadline: Option<Instant>,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T, AttemptError> {
    match bounded(deadline, fut).await? {
        Ok(value) => Ok(value),
        Err(e) if is_closed(&e) => Err(AttemptError::Closed),
        Err(e) => Err(AttemptError::Fatal(e.into())),
    }
}

/// I/O in the body phase: a peer close here is an incomplete body, fatal.
async fn h_f<T>(
    deadline: Option<Instant>,
    fut: impl Future<Output = HalyardResult<T>>,
) -> Result<T, AttemptError> {
    match bounded(deadline, fut).await? {
        Ok(value) => Ok(value),
        Err(HalyardError::Io(e)) if is_closed(&e) => {
            Err(AttemptError::Fatal(HalyardError::ConnectionClosed))
        }
        Err(e) => Err(AttemptError::Fatal(e)),
    }
}
