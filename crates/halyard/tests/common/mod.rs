//! Shared canned origin for integration tests: a real TCP listener serving
//! scripted HTTP/1.1 bytes, with enough request parsing to stay honest.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use halyard::Destination;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct Origin {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
}

impl Origin {
    /// Start an origin; the handler runs once per accepted connection with
    /// the zero-based connection index.
    pub async fn start<F, Fut>(handler: F) -> Origin
    where
        F: Fn(TcpStream, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let idx = counter.fetch_add(1, Ordering::SeqCst);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move { handler(stream, idx).await });
            }
        });

        Origin { addr, accepted }
    }

    pub fn dest(&self) -> Destination {
        Destination::new("127.0.0.1", self.addr.port(), false)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Read one request (head plus any `Content-Length` body) and return it as
/// text. Returns `None` when the client closed instead.
pub async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf: Vec<u8> = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        if let Some(end) = head_end(&buf) {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let body_len = content_length(&head);
            if buf.len() >= end + body_len {
                return Some(String::from_utf8_lossy(&buf[..end + body_len]).to_string());
            }
        }
        let n = stream.read(&mut tmp).await.ok()?;
        if n == 0 {
            return if buf.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(&buf).to_string())
            };
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}

/// Read raw bytes until the given pattern shows up (e.g. the chunked
/// terminator of an upload), returning everything read.
pub async fn read_until(stream: &mut TcpStream, pattern: &[u8]) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        if buf.windows(pattern.len()).any(|w| w == pattern) {
            return buf;
        }
        let n = stream.read(&mut tmp).await.unwrap();
        if n == 0 {
            return buf;
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}

pub async fn write_response(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.unwrap();
    stream.flush().await.unwrap();
}

fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())?
        })
        .unwrap_or(0)
}

/// A minimal 200 with a fixed-length body.
pub fn ok_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}
