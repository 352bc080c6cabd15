//! Header utilities: request-head formatting, `Connection` token matching,
//! body-framing selection, and the keep-alive decision.
//!
//! Everything here is pure over [`http::HeaderMap`]; the request state
//! machine owns the socket and just asks these questions.

use bytes::BytesMut;
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode, Version};

use crate::dest::Destination;
use crate::error::{HalyardError, HalyardResult};

/// How the response body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    /// `Content-Length: N`.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Neither: read until the peer closes.
    ReadToClose,
}

/// What happens to the connection after a successful exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseClass {
    /// Check the socket back in for reuse.
    Keep,
    /// Drop it because this side asked (`Connection: close` on the request).
    Local,
    /// Drop it because the server asked (or an HTTP/1.0 server stayed silent).
    Remote,
}

/// Normalize a method name to its canonical upper-case form.
pub fn normalize_method(name: &str) -> HalyardResult<Method> {
    Method::from_bytes(name.to_ascii_uppercase().as_bytes())
        .map_err(|_| HalyardError::InvalidRequest(format!("invalid method {name:?}")))
}

/// Format the request head: request line, generated `Host` /
/// `Content-Length` / `Transfer-Encoding` headers, then the caller's own.
///
/// Caller-supplied headers always win over generated ones, so a caller that
/// sets its own `Host` or length keeps it.
pub(crate) fn format_request_head(
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    dest: &Destination,
    body_len: Option<u64>,
    chunked: bool,
) -> BytesMut {
    let mut head = BytesMut::with_capacity(256);
    head.extend_from_slice(method.as_str().as_bytes());
    head.extend_from_slice(b" ");
    head.extend_from_slice(path.as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");

    if !headers.contains_key(HOST) {
        head.extend_from_slice(b"host: ");
        head.extend_from_slice(dest.host.as_bytes());
        if !dest.is_default_port() {
            head.extend_from_slice(format!(":{}", dest.port).as_bytes());
        }
        head.extend_from_slice(b"\r\n");
    }

    if chunked {
        if !headers.contains_key(TRANSFER_ENCODING) {
            head.extend_from_slice(b"transfer-encoding: chunked\r\n");
        }
    } else if let Some(len) = body_len {
        let wants_length = len > 0
            || *method == Method::POST
            || *method == Method::PUT
            || *method == Method::PATCH;
        if wants_length && !headers.contains_key(CONTENT_LENGTH) {
            head.extend_from_slice(format!("content-length: {len}\r\n").as_bytes());
        }
    }

    for (name, value) in headers.iter() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }

    head.extend_from_slice(b"\r\n");
    head
}

/// Whether any `Connection` header value carries the given token,
/// comma-separated and case-insensitive.
pub(crate) fn connection_has_token(headers: &HeaderMap, token: &str) -> bool {
    header_has_token(headers, &CONNECTION, token)
}

fn header_has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers.get_all(name).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    })
}

/// Select the body framing from the response headers.
///
/// `Content-Length` wins over `Transfer-Encoding: chunked`; with neither,
/// the body runs to connection close (the caller still has to validate that
/// the `Connection` header legitimizes that).
pub(crate) fn body_framing(headers: &HeaderMap) -> HalyardResult<BodyFraming> {
    if let Some(value) = headers.get(CONTENT_LENGTH) {
        let len = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                HalyardError::InvalidResponse(format!("invalid content-length {value:?}"))
            })?;
        return Ok(BodyFraming::Length(len));
    }
    if header_has_token(headers, &TRANSFER_ENCODING, "chunked") {
        return Ok(BodyFraming::Chunked);
    }
    Ok(BodyFraming::ReadToClose)
}

/// Whether a response to `method` with this status line carries a body.
///
/// `HEAD`, 204 and 304 never do; `OPTIONS` only when the server framed one
/// explicitly.
pub(crate) fn has_body(method: &Method, status: StatusCode, headers: &HeaderMap) -> bool {
    if *method == Method::HEAD {
        return false;
    }
    if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return false;
    }
    if *method == Method::OPTIONS {
        return headers.contains_key(CONTENT_LENGTH) || headers.contains_key(TRANSFER_ENCODING);
    }
    true
}

/// The keep-alive decision after a successful body read.
pub(crate) fn keep_alive(
    version: Version,
    req_headers: &HeaderMap,
    resp_headers: &HeaderMap,
) -> CloseClass {
    if connection_has_token(req_headers, "close") {
        return CloseClass::Local;
    }
    if version == Version::HTTP_11 {
        if connection_has_token(resp_headers, "close") {
            CloseClass::Remote
        } else {
            CloseClass::Keep
        }
    } else if connection_has_token(resp_headers, "keep-alive") {
        CloseClass::Keep
    } else {
        CloseClass::Remote
    }
}

/// Build a `HeaderMap` from httparse output. The error is the offending
/// header name, for the caller to wrap in context.
pub(crate) fn headers_from_httparse(raw: &[httparse::Header<'_>]) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::with_capacity(raw.len());
    for h in raw {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|_| format!("invalid header name {:?}", h.name))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|_| format!("invalid value for header {:?}", h.name))?;
        map.append(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hmap(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (n, v) in pairs {
            map.append(
                HeaderName::from_bytes(n.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_normalize_method() {
        assert_eq!(normalize_method("get").unwrap(), Method::GET);
        assert_eq!(normalize_method("Post").unwrap(), Method::POST);
        assert!(normalize_method("GE T").is_err());
    }

    #[test]
    fn test_format_head_generates_host_and_length() {
        let dest = Destination::new("example.com", 8080, false);
        let head = format_request_head(
            &Method::POST,
            "/x",
            &HeaderMap::new(),
            &dest,
            Some(5),
            false,
        );
        let text = std::str::from_utf8(&head).unwrap();
        assert!(text.starts_with("POST /x HTTP/1.1\r\n"));
        assert!(text.contains("host: example.com:8080\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_format_head_default_port_and_no_empty_get_length() {
        let dest = Destination::new("example.com", 80, false);
        let head =
            format_request_head(&Method::GET, "/", &HeaderMap::new(), &dest, Some(0), false);
        let text = std::str::from_utf8(&head).unwrap();
        assert!(text.contains("host: example.com\r\n"));
        assert!(!text.contains("content-length"));
    }

    #[test]
    fn test_format_head_respects_caller_host() {
        let dest = Destination::new("example.com", 80, false);
        let headers = hmap(&[("host", "other.example")]);
        let head = format_request_head(&Method::GET, "/", &headers, &dest, None, false);
        let text = std::str::from_utf8(&head).unwrap();
        assert_eq!(text.matches("host").count(), 1);
        assert!(text.contains("host: other.example\r\n"));
    }

    #[test]
    fn test_format_head_chunked_upload() {
        let dest = Destination::new("example.com", 80, false);
        let head = format_request_head(&Method::PUT, "/up", &HeaderMap::new(), &dest, None, true);
        let text = std::str::from_utf8(&head).unwrap();
        assert!(text.contains("transfer-encoding: chunked\r\n"));
        assert!(!text.contains("content-length"));
    }

    #[test]
    fn test_connection_tokens() {
        let headers = hmap(&[("connection", "Keep-Alive, Upgrade")]);
        assert!(connection_has_token(&headers, "keep-alive"));
        assert!(connection_has_token(&headers, "upgrade"));
        assert!(!connection_has_token(&headers, "close"));
    }

    #[test]
    fn test_framing_order_length_wins() {
        let headers = hmap(&[("content-length", "10"), ("transfer-encoding", "chunked")]);
        assert_eq!(body_framing(&headers).unwrap(), BodyFraming::Length(10));
    }

    #[test]
    fn test_framing_chunked_case_insensitive() {
        let headers = hmap(&[("transfer-encoding", "Chunked")]);
        assert_eq!(body_framing(&headers).unwrap(), BodyFraming::Chunked);
    }

    #[test]
    fn test_framing_read_to_close() {
        assert_eq!(
            body_framing(&HeaderMap::new()).unwrap(),
            BodyFraming::ReadToClose
        );
    }

    #[test]
    fn test_framing_invalid_length() {
        let headers = hmap(&[("content-length", "ten")]);
        assert!(body_framing(&headers).is_err());
    }

    #[test]
    fn test_has_body_table() {
        let empty = HeaderMap::new();
        let with_len = hmap(&[("content-length", "3")]);

        assert!(!has_body(&Method::HEAD, StatusCode::OK, &with_len));
        assert!(!has_body(&Method::GET, StatusCode::NO_CONTENT, &with_len));
        assert!(!has_body(&Method::GET, StatusCode::NOT_MODIFIED, &with_len));
        assert!(!has_body(&Method::OPTIONS, StatusCode::OK, &empty));
        assert!(has_body(&Method::OPTIONS, StatusCode::OK, &with_len));
        assert!(has_body(&Method::GET, StatusCode::OK, &empty));
    }

    #[test]
    fn test_keep_alive_http11() {
        let empty = HeaderMap::new();
        let close = hmap(&[("connection", "close")]);

        assert_eq!(keep_alive(Version::HTTP_11, &empty, &empty), CloseClass::Keep);
        assert_eq!(
            keep_alive(Version::HTTP_11, &empty, &close),
            CloseClass::Remote
        );
        assert_eq!(
            keep_alive(Version::HTTP_11, &close, &empty),
            CloseClass::Local
        );
    }

    #[test]
    fn test_keep_alive_http10() {
        let empty = HeaderMap::new();
        let ka = hmap(&[("connection", "keep-alive")]);
        let close = hmap(&[("connection", "close")]);

        assert_eq!(
            keep_alive(Version::HTTP_10, &empty, &empty),
            CloseClass::Remote
        );
        assert_eq!(keep_alive(Version::HTTP_10, &empty, &ka), CloseClass::Keep);
        assert_eq!(
            keep_alive(Version::HTTP_10, &close, &ka),
            CloseClass::Local
        );
    }
}
