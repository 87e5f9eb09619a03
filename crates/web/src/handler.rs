//! The echo handler served by `coro-server`.
//!
//! It answers every request with a plain text description of what it received:
//! the request line, each header field, any chunked trailer fields and the body
//! size. A gzip or deflate request body is inflated first, and the reply is
//! compressed with the first of gzip or deflate the client accepts.

use std::io;

use bytes::Bytes;
use coro_http::connection::Trailers;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Request, Response};
use thiserror::Error;
use tracing::debug;

use crate::encoding::{Mode, transcode};

#[derive(Error, Debug)]
pub enum EchoError {
    #[error("can't decode request body: {0}")]
    Decode(#[source] io::Error),

    #[error("can't encode response body: {0}")]
    Encode(#[source] io::Error),
}

pub fn echo(req: Request<Bytes>) -> Result<Response<Bytes>, EchoError> {
    let (parts, body) = req.into_parts();

    let body = match request_coding(&parts.headers) {
        Some(mode) => {
            let inflated = transcode(mode, &body).map_err(EchoError::Decode)?;
            debug!(?mode, compressed = body.len(), inflated = inflated.len(), "inflated request body");
            inflated
        }
        None => body,
    };

    let mut text = format!("{} {} {:?}\n", parts.method, parts.uri, parts.version);
    for (name, value) in &parts.headers {
        text.push_str(&format!("{name}: {}\n", String::from_utf8_lossy(value.as_bytes())));
    }
    if let Some(Trailers(trailers)) = parts.extensions.get::<Trailers>() {
        for (name, value) in trailers {
            text.push_str(&format!("trailer {name}: {}\n", String::from_utf8_lossy(value.as_bytes())));
        }
    }
    text.push_str(&format!("\nbody: {} bytes\n", body.len()));

    let mut response = Response::new(Bytes::new());
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    match response_coding(&parts.headers) {
        Some((mode, coding)) => {
            *response.body_mut() = transcode(mode, text.as_bytes()).map_err(EchoError::Encode)?;
            response.headers_mut().insert(CONTENT_ENCODING, HeaderValue::from_static(coding));
        }
        None => *response.body_mut() = Bytes::from(text),
    }
    Ok(response)
}

fn request_coding(headers: &HeaderMap) -> Option<Mode> {
    if has_token(headers, &CONTENT_ENCODING, "gzip") {
        Some(Mode::Gunzip)
    } else if has_token(headers, &CONTENT_ENCODING, "deflate") {
        Some(Mode::Decompress)
    } else {
        None
    }
}

fn response_coding(headers: &HeaderMap) -> Option<(Mode, &'static str)> {
    if has_token(headers, &ACCEPT_ENCODING, "gzip") {
        Some((Mode::Gzip, "gzip"))
    } else if has_token(headers, &ACCEPT_ENCODING, "deflate") {
        Some((Mode::Compress, "deflate"))
    } else {
        None
    }
}

/// Whether a comma separated header lists `token`, parameters such as `;q=` ignored.
fn has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|item| item.split_once(';').map_or(item, |(name, _)| name))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}
