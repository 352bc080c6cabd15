//! Chunked transfer encoding: chunk framing on the write side, size-line
//! parsing on the read side. The read loop itself lives with the request
//! state machine, which owns the socket.

use bytes::BytesMut;
use http::HeaderMap;

use crate::error::{HalyardError, HalyardResult};

/// Frame one chunk of data. Empty input writes nothing: a zero-size chunk
/// would terminate the body.
pub(crate) fn encode_chunk(dst: &mut BytesMut, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    dst.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    dst.extend_from_slice(data);
    dst.extend_from_slice(b"\r\n");
}

/// Frame the terminating zero chunk, with optional trailers between the
/// size line and the final blank line.
pub(crate) fn encode_last_chunk(dst: &mut BytesMut, trailers: Option<&HeaderMap>) {
    dst.extend_from_slice(b"0\r\n");
    if let Some(trailers) = trailers {
        for (name, value) in trailers.iter() {
            dst.extend_from_slice(name.as_str().as_bytes());
            dst.extend_from_slice(b": ");
            dst.extend_from_slice(value.as_bytes());
            dst.extend_from_slice(b"\r\n");
        }
    }
    dst.extend_from_slice(b"\r\n");
}

/// Parse a chunk size line: optional leading whitespace, hex digits, then
/// optionally `;extension` up to the end of the line.
pub(crate) fn parse_size_line(line: &[u8]) -> HalyardResult<u64> {
    let text = std::str::from_utf8(line)
        .map_err(|_| HalyardError::InvalidChunk("size line is not ASCII".to_string()))?;
    let text = text.trim_start_matches([' ', '\t']);
    let digits = match text.find(';') {
        Some(idx) => &text[..idx],
        None => text,
    }
    .trim_end_matches([' ', '\t']);

    if digits.is_empty() {
        return Err(HalyardError::InvalidChunk("empty size line".to_string()));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|_| HalyardError::InvalidChunk(format!("bad size line {text:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_chunk() {
        let mut buf = BytesMut::new();
        encode_chunk(&mut buf, b"hello");
        assert_eq!(&buf[..], b"5\r\nhello\r\n");
    }

    #[test]
    fn test_encode_empty_chunk_writes_nothing() {
        let mut buf = BytesMut::new();
        encode_chunk(&mut buf, b"");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_last_chunk_plain() {
        let mut buf = BytesMut::new();
        encode_last_chunk(&mut buf, None);
        assert_eq!(&buf[..], b"0\r\n\r\n");
    }

    #[test]
    fn test_encode_last_chunk_with_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert(
            http::header::HeaderName::from_static("x-checksum"),
            http::header::HeaderValue::from_static("abc"),
        );
        let mut buf = BytesMut::new();
        encode_last_chunk(&mut buf, Some(&trailers));
        assert_eq!(&buf[..], b"0\r\nx-checksum: abc\r\n\r\n");
    }

    #[test]
    fn test_parse_size_line() {
        assert_eq!(parse_size_line(b"5").unwrap(), 5);
        assert_eq!(parse_size_line(b"1a").unwrap(), 26);
        assert_eq!(parse_size_line(b"FF").unwrap(), 255);
        assert_eq!(parse_size_line(b"  10").unwrap(), 16);
        assert_eq!(parse_size_line(b"5; name=value").unwrap(), 5);
        assert_eq!(parse_size_line(b"0").unwrap(), 0);
    }

    #[test]
    fn test_parse_size_line_rejects_garbage() {
        assert!(parse_size_line(b"").is_err());
        assert!(parse_size_line(b"xyz").is_err());
        assert!(parse_size_line(b"; ext-only").is_err());
        assert!(parse_size_line(b"-5").is_err());
    }
}
