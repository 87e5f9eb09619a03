//! HTTP request header handling implementation.
//!
//! This module wraps the standard `http::Request` type with the connection-level
//! questions the runtime asks of every request: does the client want the
//! connection kept open, and is it waiting for a `100 Continue`.

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version, header};

/// Represents an HTTP request header.
///
/// This struct wraps a `http::Request<()>` to provide:
/// - Access to standard HTTP header fields
/// - Body attachment once the frame reader has decoded the payload
/// - Keep-alive and `Expect` inspection
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    /// Consumes the header and returns the inner `Request<()>`.
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body to this header, converting it into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|_| body)
    }

    /// Returns a reference to the request's HTTP method.
    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    /// Returns a reference to the request's URI.
    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    /// Returns the request's HTTP version.
    pub fn version(&self) -> Version {
        self.inner.version()
    }

    /// Returns a reference to the request's headers.
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Whether the connection should stay open after this request.
    ///
    /// HTTP/1.1 is persistent unless the client sends `Connection: close`;
    /// HTTP/1.0 is persistent only with `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        match self.version() {
            Version::HTTP_11 => !self.has_connection_token("close"),
            Version::HTTP_10 => self.has_connection_token("keep-alive"),
            _ => false,
        }
    }

    /// Whether the client sent `Expect: 100-continue` and waits before sending the body.
    pub fn expects_continue(&self) -> bool {
        self.headers()
            .get(header::EXPECT)
            .is_some_and(|value| value.as_bytes().trim_ascii().eq_ignore_ascii_case(b"100-continue"))
    }

    fn has_connection_token(&self, token: &str) -> bool {
        self.headers().get_all(header::CONNECTION).iter().any(|value| {
            value.as_bytes().split(|b| *b == b',').any(|t| t.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
        })
    }
}

/// Converts request parts into a RequestHeader.
impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

/// Converts a bodyless request into a RequestHeader.
impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version: Version, connection: Option<&str>) -> RequestHeader {
        let mut builder = Request::builder().method(Method::GET).uri("/").version(version);
        if let Some(value) = connection {
            builder = builder.header(header::CONNECTION, value);
        }
        builder.body(()).unwrap().into()
    }

    #[test]
    fn http11_is_persistent_by_default() {
        assert!(header(Version::HTTP_11, None).is_keep_alive());
        assert!(header(Version::HTTP_11, Some("Keep-Alive")).is_keep_alive());
        assert!(!header(Version::HTTP_11, Some("close")).is_keep_alive());
        assert!(!header(Version::HTTP_11, Some("upgrade, Close")).is_keep_alive());
    }

    #[test]
    fn http10_needs_explicit_keep_alive() {
        assert!(!header(Version::HTTP_10, None).is_keep_alive());
        assert!(header(Version::HTTP_10, Some("keep-alive")).is_keep_alive());
        assert!(header(Version::HTTP_10, Some("KEEP-ALIVE")).is_keep_alive());
    }

    #[test]
    fn expect_continue() {
        let req: RequestHeader =
            Request::builder().method(Method::POST).uri("/upload").header(header::EXPECT, "100-Continue").body(()).unwrap().into();
        assert!(req.expects_continue());
        assert!(!header(Version::HTTP_11, None).expects_continue());
    }

    #[test]
    fn attach_body() {
        let req = header(Version::HTTP_11, None).body("payload");
        assert_eq!(req.uri().path(), "/");
        assert_eq!(*req.body(), "payload");
    }
}
