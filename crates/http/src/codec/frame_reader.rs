//! Incremental, restartable HTTP/1.x request framing.
//!
//! A [`FrameReader`] accumulates raw bytes from a connection and answers, without
//! consuming anything, whether the header terminator has arrived yet. The
//! terminator matcher keeps its position between calls, so each byte is examined
//! at most once no matter how the peer fragments its writes. `CRLFCRLF` and `LFLF`
//! are both accepted and the earliest one wins.
//!
//! Once the head is complete it is parsed into a [`RequestHeader`] and the payload
//! (fixed length or chunked) is decoded into a separate body buffer, bounded by
//! [`FrameReader::with_max_body`]. Bytes beyond the current request stay in the
//! accumulator for [`FrameReader::consume_frame`] to hand to the next request on a
//! keep-alive connection.
//!
//! Bytes come from a [`Source`]. In the runtime that is a socket read which
//! suspends the connection task on would-block; in tests a scripted source.

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::{HeaderDecoder, MAX_HEADER_BYTES, MAX_HEADER_NUM};
use crate::ensure;
use crate::protocol::{ParseError, PayloadItem, PayloadSize, RequestHeader};

/// Default limit of a decoded request body.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Producer of request bytes.
pub trait Source {
    /// Appends newly arrived bytes to `buf` and returns how many were added.
    /// `Ok(0)` means the peer closed its sending side.
    fn fill(&mut self, buf: &mut BytesMut) -> impl Future<Output = Result<usize, ParseError>>;
}

/// Location of the header terminator inside the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderEnd {
    /// Index of the terminator's first byte.
    pub offset: usize,
    /// 4 for `CRLFCRLF`, 2 for `LFLF`.
    pub len: usize,
}

impl HeaderEnd {
    /// Index of the first byte after the head.
    #[inline]
    pub fn body_start(&self) -> usize {
        self.offset + self.len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Terminator {
    #[default]
    Start,
    Cr1,
    Lf1,
    Cr2,
    Lf,
}

impl Terminator {
    /// Advances over one byte; yields the terminator length when one completes.
    #[inline]
    fn step(self, b: u8) -> (Terminator, Option<usize>) {
        use Terminator::*;
        match (self, b) {
            (Cr1, b'\n') => (Lf1, None),
            (Lf1, b'\r') => (Cr2, None),
            (Lf1 | Lf, b'\n') => (Start, Some(2)),
            (Cr2, b'\n') => (Start, Some(4)),
            (_, b'\r') => (Cr1, None),
            (Start, b'\n') => (Lf, None),
            _ => (Start, None),
        }
    }
}

#[derive(Debug)]
pub struct FrameReader {
    buf: BytesMut,
    scanned: usize,
    matcher: Terminator,
    end: Option<HeaderEnd>,
    header: Option<RequestHeader>,
    payload_size: Option<PayloadSize>,
    body: BytesMut,
    body_done: bool,
    trailers: HeaderMap,
    max_body: usize,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::with_max_body(MAX_BODY_BYTES)
    }
}

impl FrameReader {
    /// A reader accepting bodies of up to 8 MiB.
    pub fn new() -> Self {
        Self::default()
    }

    /// A reader rejecting bodies longer than `max_body` bytes with
    /// [`ParseError::TooLargeBody`].
    pub fn with_max_body(max_body: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            matcher: Terminator::Start,
            end: None,
            header: None,
            payload_size: None,
            body: BytesMut::new(),
            body_done: false,
            trailers: HeaderMap::new(),
            max_body,
        }
    }

    /// Returns where the head ends, scanning only bytes not examined before.
    ///
    /// Once found the answer is cached and no further byte is consulted.
    pub fn have_end(&mut self) -> Option<HeaderEnd> {
        if self.end.is_some() {
            return self.end;
        }

        while self.scanned < self.buf.len() {
            let (next, found) = self.matcher.step(self.buf[self.scanned]);
            self.matcher = next;
            self.scanned += 1;

            if let Some(len) = found {
                let end = HeaderEnd { offset: self.scanned - len, len };
                trace!(offset = end.offset, len, "found header end");
                self.end = Some(end);
                return self.end;
            }
        }
        None
    }

    /// How many bytes of the current frame the terminator matcher has examined.
    pub fn scanned(&self) -> usize {
        self.scanned
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Raw bytes not yet claimed by a parsed head or body.
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Pulls bytes from `source` until the head is complete.
    ///
    /// Returns `Ok(false)` when the peer closed before sending anything, which is
    /// the normal end of a keep-alive connection.
    pub async fn read_header<S: Source>(&mut self, source: &mut S) -> Result<bool, ParseError> {
        loop {
            if self.have_end().is_some() {
                return Ok(true);
            }

            ensure!(self.buf.len() < MAX_HEADER_BYTES, ParseError::too_large_header(self.buf.len(), MAX_HEADER_BYTES));

            if source.fill(&mut self.buf).await? == 0 {
                return if self.buf.is_empty() { Ok(false) } else { Err(ParseError::Closed) };
            }
        }
    }

    /// Parses the head and returns the declared content length (0 when absent).
    ///
    /// Calling it again returns the cached result.
    pub fn parse_headers(&mut self) -> Result<u64, ParseError> {
        if let Some(payload_size) = self.payload_size {
            return Ok(payload_size.content_length());
        }

        let end = self.have_end().ok_or_else(|| ParseError::invalid_header("header terminator not received"))?;
        let mut head = self.buf.split_to(end.body_start());
        let (header, payload_size) =
            HeaderDecoder.decode(&mut head)?.ok_or_else(|| ParseError::invalid_header("incomplete request head"))?;

        trace!(method = %header.method(), uri = %header.uri(), ?payload_size, "parsed request head");
        self.header = Some(header);
        self.payload_size = Some(payload_size);
        Ok(payload_size.content_length())
    }

    pub fn header(&self) -> Option<&RequestHeader> {
        self.header.as_ref()
    }

    pub fn take_header(&mut self) -> Option<RequestHeader> {
        self.header.take()
    }

    pub fn payload_size(&self) -> Option<PayloadSize> {
        self.payload_size
    }

    /// Reads a fixed-length body of `content_length` bytes following the head.
    pub async fn read_body<S: Source>(&mut self, content_length: u64, source: &mut S) -> Result<(), ParseError> {
        self.check_body_size(content_length)?;
        self.decode_payload(PayloadDecoder::fix_length(content_length), source).await
    }

    /// Decodes a chunked body. Extensions are skipped and trailer fields end up in
    /// [`trailers`](Self::trailers).
    pub async fn read_chunked<S: Source>(&mut self, source: &mut S) -> Result<(), ParseError> {
        self.decode_payload(PayloadDecoder::chunked(), source).await
    }

    /// Reads whatever payload the parsed head declared.
    pub async fn read_payload<S: Source>(&mut self, source: &mut S) -> Result<(), ParseError> {
        self.parse_headers()?;
        let payload_size = self.payload_size.unwrap_or(PayloadSize::Empty);
        self.check_body_size(payload_size.content_length())?;
        self.decode_payload(PayloadDecoder::from(payload_size), source).await
    }

    async fn decode_payload<S: Source>(&mut self, mut decoder: PayloadDecoder, source: &mut S) -> Result<(), ParseError> {
        self.parse_headers()?;

        loop {
            match decoder.decode(&mut self.buf)? {
                Some(PayloadItem::Chunk(bytes)) => {
                    self.check_body_size((self.body.len() + bytes.len()) as u64)?;
                    self.body.extend_from_slice(&bytes);
                }
                Some(PayloadItem::Eof) => break,
                None => {
                    if source.fill(&mut self.buf).await? == 0 {
                        return Err(ParseError::invalid_body("connection closed before the body was complete"));
                    }
                }
            }
        }

        let trailer = decoder.take_trailer();
        if !trailer.is_empty() {
            self.trailers = parse_trailers(&trailer)?;
        }
        self.body_done = true;
        trace!(body_size = self.body.len(), "read request body");
        Ok(())
    }

    fn check_body_size(&self, size: u64) -> Result<(), ParseError> {
        ensure!(size <= self.max_body as u64, ParseError::too_large_body(size, self.max_body));
        Ok(())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn take_body(&mut self) -> Bytes {
        self.body.split().freeze()
    }

    /// Trailer fields of a chunked body.
    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    pub fn take_trailers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.trailers)
    }

    /// Returns to the pre-scan state and discards every byte.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.clear_frame();
    }

    /// Finishes the current request on a keep-alive connection.
    ///
    /// The request's head and body are discarded and bytes the peer already sent
    /// for the next request are kept. A declared body that was never decoded has
    /// no known end, so it is discarded along with everything after it.
    pub fn consume_frame(&mut self) {
        match (self.payload_size, self.end) {
            (None, Some(end)) => self.buf.advance(end.body_start()),
            (None, None) => self.buf.clear(),
            (Some(payload_size), _) if !self.body_done && !payload_size.is_empty() => self.buf.clear(),
            (Some(_), _) => {}
        }
        self.clear_frame();
    }

    fn clear_frame(&mut self) {
        self.scanned = 0;
        self.matcher = Terminator::Start;
        self.end = None;
        self.header = None;
        self.payload_size = None;
        self.body.clear();
        self.body_done = false;
        self.trailers.clear();
    }
}

fn parse_trailers(raw: &[u8]) -> Result<HeaderMap, ParseError> {
    let mut block = BytesMut::with_capacity(raw.len() + 2);
    block.extend_from_slice(raw);
    block.extend_from_slice(b"\r\n");

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    let parsed = match httparse::parse_headers(&block, &mut headers) {
        Ok(Status::Complete((_, parsed))) => parsed,
        Ok(Status::Partial) => return Err(ParseError::invalid_header("incomplete trailer section")),
        Err(httparse::Error::TooManyHeaders) => return Err(ParseError::too_many_headers(MAX_HEADER_NUM)),
        Err(e) => return Err(ParseError::invalid_header(e)),
    };

    let mut trailers = HeaderMap::with_capacity(parsed.len());
    for header in parsed {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(ParseError::invalid_header)?;
        let value = HeaderValue::from_bytes(header.value.trim_ascii()).map_err(ParseError::invalid_header)?;
        trailers.append(name, value);
    }
    Ok(trailers)
}
