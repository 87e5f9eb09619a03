use crate::codec::header::HeaderEncoder;
use crate::protocol::{PayloadSize, SendError};
use bytes::{Bytes, BytesMut};
use http::Response;
use tokio_util::codec::Encoder;
use tracing::trace;

/// Serializes a complete buffered response: status line, headers with the
/// `Content-Length` of the body, then the body.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Encoder<Response<Bytes>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Response<Bytes>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (parts, body) = item.into_parts();
        let payload_size = PayloadSize::new_length(body.len() as u64);

        self.header_encoder.encode((Response::from_parts(parts, ()), payload_size), dst)?;
        dst.extend_from_slice(&body);
        trace!(body_size = body.len(), "encoded response");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{StatusCode, header};

    #[test]
    fn encodes_head_and_body() {
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONNECTION, "keep-alive")
            .body(Bytes::from_static(b"Hello World!"))
            .unwrap();
        let mut dst = BytesMut::new();

        ResponseEncoder::new().encode(response, &mut dst).unwrap();

        let text = std::str::from_utf8(&dst).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("connection: keep-alive\r\n"));
        assert!(text.contains("content-length: 12\r\n"));
        assert!(text.ends_with("\r\n\r\nHello World!"));
    }

    #[test]
    fn empty_body_has_zero_length() {
        let response = Response::builder().status(StatusCode::BAD_REQUEST).body(Bytes::new()).unwrap();
        let mut dst = BytesMut::new();

        ResponseEncoder::new().encode(response, &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\n\r\n");
    }
}
