//! HTTP response header handling implementation.
//!
//! Responses use the standard `http::Response` type. A head travels to the
//! encoder with an empty body placeholder and the payload is written after it.

use bytes::Bytes;
use http::{Response, StatusCode, Version, header};

/// Type alias for HTTP response headers.
pub type ResponseHead = Response<()>;

/// Builds a bodyless response with `status`, used for protocol level replies
/// such as `400 Bad Request` and `100 Continue`.
pub fn status_response(status: StatusCode, version: Version) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    *response.version_mut() = version;
    response.headers_mut().insert(header::CONTENT_TYPE, header::HeaderValue::from_static("text/plain"));
    response
}
