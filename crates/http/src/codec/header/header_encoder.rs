//! HTTP header encoder implementation for serializing HTTP response headers
//!
//! This module encodes the status line and header fields of a response and
//! manages the `Content-Length` / `Transfer-Encoding` headers from the payload size.

use crate::protocol::{PayloadSize, ResponseHead, SendError};

use bytes::{BufMut, BytesMut};

use http::{HeaderValue, Version, header};
use std::io;
use std::io::{ErrorKind, Write};
use tokio_util::codec::Encoder;
use tracing::error;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Encoder for HTTP response headers implementing the [`Encoder`] trait.
///
/// HTTP/1.0 heads keep their version on the status line so a 1.0 client sees a
/// 1.0 reply; everything else is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut header, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        let version = match header.version() {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        };
        write!(
            FastWrite(dst),
            "{version} {} {}\r\n",
            header.status().as_str(),
            header.status().canonical_reason().unwrap_or("Unknown")
        )?;

        // Set appropriate content length or transfer encoding header
        match payload_size {
            PayloadSize::Length(n) => {
                header.headers_mut().insert(header::CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                header.headers_mut().insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            PayloadSize::Empty => {
                const ZERO_VALUE: HeaderValue = HeaderValue::from_static("0");
                header.headers_mut().insert(header::CONTENT_LENGTH, ZERO_VALUE);
            }
        }

        for (header_name, header_value) in header.headers().iter() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Adapts `BytesMut` to `io::Write` so `write!` formats straight into the buffer.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Response, StatusCode};

    #[test]
    fn writes_status_line_and_length() {
        let head = Response::builder().status(StatusCode::NOT_FOUND).header("X-Trace", "a").body(()).unwrap();
        let mut dst = BytesMut::new();

        HeaderEncoder.encode((head, PayloadSize::new_length(12)), &mut dst).unwrap();

        let text = std::str::from_utf8(&dst).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("x-trace: a\r\n"));
        assert!(text.contains("content-length: 12\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn empty_payload_overrides_stale_length() {
        let head = Response::builder().version(Version::HTTP_10).header(header::CONTENT_LENGTH, "99").body(()).unwrap();
        let mut dst = BytesMut::new();

        HeaderEncoder.encode((head, PayloadSize::new_empty()), &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.0 200 OK\r\ncontent-length: 0\r\n\r\n");
    }

    #[test]
    fn refuses_http2() {
        let head = Response::builder().version(Version::HTTP_2).body(()).unwrap();
        assert!(HeaderEncoder.encode((head, PayloadSize::new_empty()), &mut BytesMut::new()).is_err());
    }
}
