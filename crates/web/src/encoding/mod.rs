//! Module for compressing and decompressing message bodies.
//!
//! [`Zlib`] is a streaming codec over `flate2`, fed piece by piece in zlib or gzip
//! framing; [`transcode`] runs one over a whole buffer.

use bytes::{Bytes, BytesMut};
use std::io;

mod zlib;

pub use zlib::{Mode, Zlib, transcode};

// output sink shared by the flate2 writers
pub(crate) struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
