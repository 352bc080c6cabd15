//! Socket transport unifying plaintext TCP and TLS.
//!
//! A [`Stream`] is what the pool lends out and the request state machine
//! drives: connect with a deadline, async read/write, and a non-blocking
//! probe that lets the pool observe passive peer closes while a socket
//! sits idle.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::trace;

use crate::config::ConnectOptions;
use crate::dest::Destination;
use crate::error::{HalyardError, HalyardResult};

/// One client connection, plaintext or TLS.
pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    /// Open a connection to the destination, TLS handshake included when the
    /// destination asks for it. The whole operation is bounded by
    /// `connect_timeout`.
    pub(crate) async fn connect(
        dest: &Destination,
        opts: &ConnectOptions,
        connect_timeout: Option<Duration>,
    ) -> HalyardResult<Stream> {
        match connect_timeout {
            Some(t) => timeout(t, Self::connect_inner(dest, opts))
                .await
                .map_err(|_| HalyardError::ConnectTimeout(t))?,
            None => Self::connect_inner(dest, opts).await,
        }
    }

    async fn connect_inner(dest: &Destination, opts: &ConnectOptions) -> HalyardResult<Stream> {
        let tcp = tcp_connect(&dest.host, dest.port, opts).await?;
        tcp.set_nodelay(opts.nodelay)?;

        if !dest.tls {
            trace!(dest = %dest, "connected");
            return Ok(Stream::Plain(tcp));
        }

        let server_name = ServerName::try_from(dest.host.clone())
            .map_err(|_| HalyardError::Tls(format!("invalid server name {:?}", dest.host)))?;
        let tls = tls_connector()
            .connect(server_name, tcp)
            .await
            .map_err(|e| HalyardError::Tls(e.to_string()))?;
        trace!(dest = %dest, "connected with TLS");
        Ok(Stream::Tls(Box::new(tls)))
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(s) => s,
            Stream::Tls(s) => s.get_ref().0,
        }
    }

    /// Non-blocking probe for an idle socket.
    ///
    /// An idle HTTP/1.1 connection must be silent, so anything readable means
    /// the socket is no longer reusable: `Ok(0)` is a peer close, actual
    /// bytes are protocol garbage, and any hard error condemns the socket.
    pub(crate) fn probe_closed(&self) -> bool {
        let mut buf = [0u8; 1];
        match self.tcp().try_read(&mut buf) {
            Ok(0) => true,
            Ok(_) => true,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stream::Plain(_) => f.write_str("Stream::Plain"),
            Stream::Tls(_) => f.write_str("Stream::Tls"),
        }
    }
}

async fn tcp_connect(host: &str, port: u16, opts: &ConnectOptions) -> HalyardResult<TcpStream> {
    let mut last_err: Option<io::Error> = None;

    for addr in lookup_host((host, port)).await? {
        let attempt = match opts.local_addr {
            Some(ip) => bound_connect(addr, ip).await,
            None => TcpStream::connect(addr).await,
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err
        .unwrap_or_else(|| io::Error::other(format!("no addresses resolved for {host}:{port}")))
        .into())
}

async fn bound_connect(addr: SocketAddr, local: std::net::IpAddr) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.bind(SocketAddr::new(local, 0))?;
    socket.connect(addr).await
}

/// Shared TLS client configuration, built once per process against the
/// webpki root set.
fn tls_connector() -> TlsConnector {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    let config = CONFIG.get_or_init(|| {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    });
    TlsConnector::from(Arc::clone(config))
}
