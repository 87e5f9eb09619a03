//! Decoder for the chunked transfer coding.
//!
//! A chunked body is a series of size lines, each followed by that many data bytes
//! and a line break, closed by a zero size line, optional trailer fields and an
//! empty line. Line breaks may be `CRLF` or a bare `LF`, as in the request head.
//!
//! Line states remember how far the pending line was searched, so a peer that
//! dribbles a size line or a trailer field byte by byte is never rescanned.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::header::MAX_HEADER_BYTES;
use crate::ensure;
use crate::protocol::{ParseError, PayloadItem};

/// Longest size line accepted, chunk extensions included.
const MAX_SIZE_LINE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
    /// Bytes of the pending line already searched for its `LF`.
    scanned: usize,
    /// Trailer field lines, line breaks included.
    trailer: BytesMut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    /// Chunk data with this many bytes still to come.
    Data(u64),
    /// The line break closing chunk data.
    DataEnd,
    /// Trailer fields up to the empty line.
    Trailer,
    Done,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size, scanned: 0, trailer: BytesMut::new() }
    }

    /// Raw trailer field lines seen after the last chunk.
    pub fn take_trailer(&mut self) -> BytesMut {
        std::mem::take(&mut self.trailer)
    }

    /// Splits off the next complete line, or records how much of `src` holds none.
    fn next_line(&mut self, src: &mut BytesMut) -> Option<BytesMut> {
        let found = src.get(self.scanned..).and_then(|rest| rest.iter().position(|&b| b == b'\n'));
        match found {
            Some(i) => {
                let end = self.scanned + i + 1;
                self.scanned = 0;
                Some(src.split_to(end))
            }
            None => {
                self.scanned = src.len();
                None
            }
        }
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    /// Returns the next piece of chunk data, `Eof` once the trailer section is
    /// complete, or `None` when `src` holds no further progress.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Size => {
                    let Some(line) = self.next_line(src) else {
                        ensure!(src.len() <= MAX_SIZE_LINE, ParseError::invalid_body("chunk size line too long"));
                        return Ok(None);
                    };
                    ensure!(line.len() <= MAX_SIZE_LINE, ParseError::invalid_body("chunk size line too long"));

                    let size = parse_size(&line)?;
                    trace!(size, "read chunk size");
                    self.state = if size == 0 { State::Trailer } else { State::Data(size) };
                }

                State::Data(remaining) => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = usize::try_from(remaining).map_or(src.len(), |remaining| remaining.min(src.len()));
                    let bytes = src.split_to(len).freeze();

                    let remaining = remaining - bytes.len() as u64;
                    self.state = if remaining == 0 { State::DataEnd } else { State::Data(remaining) };
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }

                State::DataEnd => {
                    let skip = match src.chunk() {
                        [] | [b'\r'] => return Ok(None),
                        [b'\n', ..] => 1,
                        [b'\r', b'\n', ..] => 2,
                        _ => return Err(ParseError::invalid_body("missing line break after chunk data")),
                    };
                    src.advance(skip);
                    self.state = State::Size;
                }

                State::Trailer => {
                    let Some(line) = self.next_line(src) else {
                        let pending = self.trailer.len() + src.len();
                        ensure!(pending <= MAX_HEADER_BYTES, ParseError::too_large_header(pending, MAX_HEADER_BYTES));
                        return Ok(None);
                    };

                    if matches!(line.chunk(), b"\n" | b"\r\n") {
                        self.state = State::Done;
                        continue;
                    }
                    let size = self.trailer.len() + line.len();
                    ensure!(size <= MAX_HEADER_BYTES, ParseError::too_large_header(size, MAX_HEADER_BYTES));
                    self.trailer.extend_from_slice(&line);
                }

                State::Done => {
                    trace!(trailer_size = self.trailer.len(), "finished reading chunked data");
                    return Ok(Some(PayloadItem::Eof));
                }
            }
        }
    }
}

/// Parses the hex size of a size line, ignoring any chunk extension.
fn parse_size(line: &[u8]) -> Result<u64, ParseError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let digits = line.iter().position(|&b| b == b';').map_or(line, |i| &line[..i]).trim_ascii_end();
    ensure!(!digits.is_empty(), ParseError::invalid_body("missing chunk size"));

    digits
        .iter()
        .try_fold(0u64, |size, &b| {
            let digit = char::from(b).to_digit(16)?;
            size.checked_mul(16)?.checked_add(u64::from(digit))
        })
        .ok_or_else(|| ParseError::invalid_body("invalid chunk size"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn decode_all(decoder: &mut ChunkedDecoder, buffer: &mut BytesMut) -> Result<Option<Vec<u8>>, ParseError> {
        let mut body = Vec::new();
        loop {
            match decoder.decode(buffer)? {
                Some(PayloadItem::Chunk(bytes)) => body.extend_from_slice(&bytes),
                Some(PayloadItem::Eof) => return Ok(Some(body)),
                None => return Ok(None),
            }
        }
    }

    #[test]
    fn wikipedia_example() {
        let mut buffer = BytesMut::from(&b"4\r\nWiki\r\n6\r\npedia \r\nE\r\nin \r\n\r\nchunks.\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let body = decode_all(&mut decoder, &mut buffer).unwrap().unwrap();

        assert_eq!(body, b"Wikipedia in \r\n\r\nchunks.");
        assert!(buffer.is_empty());
        assert!(decoder.take_trailer().is_empty());
    }

    #[test]
    fn bare_lf_line_breaks() {
        let mut buffer = BytesMut::from(&b"3\nabc\n2 \nde\n0\nX-A: 1\n\nnext"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(decode_all(&mut decoder, &mut buffer).unwrap().unwrap(), b"abcde");
        assert_eq!(&decoder.take_trailer()[..], b"X-A: 1\n");
        assert_eq!(&buffer[..], b"next");
    }

    #[test]
    fn byte_by_byte_input() {
        let input = b"5;ext\r\nhello\r\n0\r\nA: b\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        let mut buffer = BytesMut::new();
        let mut body = Vec::new();
        let mut finished = false;

        for b in input {
            buffer.extend_from_slice(&[*b]);
            while let Some(item) = decoder.decode(&mut buffer).unwrap() {
                match item {
                    PayloadItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                    PayloadItem::Eof => {
                        finished = true;
                        break;
                    }
                }
            }
        }

        assert!(finished);
        assert_eq!(body, b"hello");
        assert_eq!(&decoder.take_trailer()[..], b"A: b\r\n");
    }

    #[test]
    fn chunks_arrive_one_at_a_time() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(decoder.decode(&mut buffer).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b"hello"))));
        assert_eq!(decoder.decode(&mut buffer).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b", world"))));
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn extensions_are_ignored() {
        let mut buffer = BytesMut::from(&b"5;chunk-ext=value\r\nhello\r\n0;last\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(decode_all(&mut decoder, &mut buffer).unwrap().unwrap(), b"hello");
    }

    #[test]
    fn trailers_are_kept() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n0\r\nExpires: never\r\nX-Sum: 42\r\n\r\nGET"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(decode_all(&mut decoder, &mut buffer).unwrap().unwrap(), b"hello");
        assert_eq!(&decoder.take_trailer()[..], b"Expires: never\r\nX-Sum: 42\r\n");
        // the next request is left alone
        assert_eq!(&buffer[..], b"GET");
    }

    #[test]
    fn partial_chunk_resumes() {
        let mut buffer = BytesMut::from(&b"5\r\nhel"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(decoder.decode(&mut buffer).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b"hel"))));
        assert_eq!(decoder.decode(&mut buffer).unwrap(), None);

        buffer.extend_from_slice(b"lo\r\n0\r\n");
        assert_eq!(decoder.decode(&mut buffer).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b"lo"))));
        assert_eq!(decoder.decode(&mut buffer).unwrap(), None);

        buffer.extend_from_slice(b"\r\n");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn invalid_size_is_rejected() {
        for line in [&b"xyz\r\n"[..], &b"\r\n"[..], &b"+5\r\n"[..], &b"5 5\r\n"[..]] {
            let mut buffer = BytesMut::from(line);
            let result = ChunkedDecoder::new().decode(&mut buffer);
            assert!(matches!(result, Err(ParseError::InvalidBody { .. })), "{line:?}");
        }
    }

    #[test]
    fn overflowing_size_is_rejected() {
        let mut buffer = BytesMut::from(&b"fffffffffffffffff\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).is_err());
    }

    #[test]
    fn endless_size_line_is_rejected() {
        let mut buffer = BytesMut::from(&vec![b'0'; MAX_SIZE_LINE + 1][..]);
        assert!(matches!(ChunkedDecoder::new().decode(&mut buffer), Err(ParseError::InvalidBody { .. })));
    }

    #[test]
    fn oversized_trailer_is_rejected() {
        let mut decoder = ChunkedDecoder::new();
        let mut buffer = BytesMut::from(&b"0\r\n"[..]);
        assert_eq!(decoder.decode(&mut buffer).unwrap(), None);

        let field = format!("X-Pad: {}\r\n", "p".repeat(1000));
        let mut result = Ok(None);
        for _ in 0..=MAX_HEADER_BYTES / field.len() {
            buffer.extend_from_slice(field.as_bytes());
            result = decoder.decode(&mut buffer);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(ParseError::TooLargeHeader { .. })));
    }

    #[test]
    fn missing_crlf_after_data() {
        let mut buffer = BytesMut::from(&b"5\r\nhelloBad"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_chunk());
        assert!(decoder.decode(&mut buffer).is_err());
    }
}
