use std::fmt;
use std::io::{self, Write};

use bytes::{Bytes, BytesMut};
use flate2::Compression;
use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use tracing::trace;

use super::Writer;

const PIECE: usize = 16 * 1024;

/// What a [`Zlib`] stream does with the bytes written to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Deflate with zlib framing, the `deflate` content coding.
    Compress,
    /// Inflate zlib-framed input.
    Decompress,
    /// Deflate with gzip framing.
    Gzip,
    /// Inflate gzip-framed input.
    Gunzip,
}

enum Stream {
    Deflate(ZlibEncoder<Writer>),
    Inflate(ZlibDecoder<Writer>),
    Gzip(GzEncoder<Writer>),
    Gunzip(GzDecoder<Writer>),
}

/// Streaming compression codec.
///
/// Input is fed with [`write`](Self::write) in pieces of any size; output produced
/// so far is collected with [`take`](Self::take), and [`finish`](Self::finish) flushes
/// the rest of the stream.
pub struct Zlib {
    mode: Mode,
    stream: Stream,
    total_in: u64,
}

impl fmt::Debug for Zlib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zlib").field("mode", &self.mode).field("total_in", &self.total_in).finish_non_exhaustive()
    }
}

impl Zlib {
    pub fn new(mode: Mode) -> Self {
        let stream = match mode {
            Mode::Compress => Stream::Deflate(ZlibEncoder::new(Writer::new(), Compression::fast())),
            Mode::Decompress => Stream::Inflate(ZlibDecoder::new(Writer::new())),
            Mode::Gzip => Stream::Gzip(GzEncoder::new(Writer::new(), Compression::fast())),
            Mode::Gunzip => Stream::Gunzip(GzDecoder::new(Writer::new())),
        };
        Self { mode, stream, total_in: 0 }
    }

    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let result = match &mut self.stream {
            Stream::Deflate(encoder) => encoder.write_all(data),
            Stream::Inflate(decoder) => decoder.write_all(data),
            Stream::Gzip(encoder) => encoder.write_all(data),
            Stream::Gunzip(decoder) => decoder.write_all(data),
        };
        if let Err(e) = &result {
            trace!(mode = ?self.mode, cause = %e, "zlib stream failed");
        }
        result?;
        self.total_in += data.len() as u64;
        Ok(())
    }

    /// Output produced so far.
    pub fn take(&mut self) -> Bytes {
        match &mut self.stream {
            Stream::Deflate(encoder) => encoder.get_mut().take(),
            Stream::Inflate(decoder) => decoder.get_mut().take(),
            Stream::Gzip(encoder) => encoder.get_mut().take(),
            Stream::Gunzip(decoder) => decoder.get_mut().take(),
        }
    }

    /// Ends the stream and returns the output not taken yet.
    pub fn finish(self) -> io::Result<Bytes> {
        trace!(mode = ?self.mode, total_in = self.total_in, "finishing zlib stream");
        let writer = match self.stream {
            Stream::Deflate(encoder) => encoder.finish()?,
            Stream::Inflate(decoder) => decoder.finish()?,
            Stream::Gzip(encoder) => encoder.finish()?,
            Stream::Gunzip(decoder) => decoder.finish()?,
        };
        Ok(writer.into_bytes())
    }
}

/// Runs `input` through a fresh stream of `mode`.
pub fn transcode(mode: Mode, input: &[u8]) -> io::Result<Bytes> {
    let mut zlib = Zlib::new(mode);
    let mut out = BytesMut::new();
    for piece in input.chunks(PIECE) {
        zlib.write(piece)?;
        out.extend_from_slice(&zlib.take());
    }
    out.extend_from_slice(&zlib.finish()?);
    Ok(out.freeze())
}
