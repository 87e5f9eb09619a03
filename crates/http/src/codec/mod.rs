//! HTTP codec module for framing requests and encoding responses
//!
//! - Request handling:
//!   - [`FrameReader`]: incremental header-end detection, head parsing and body
//!     extraction over any [`Source`] of bytes
//!   - Header parsing via [`header`] module
//!   - Payload decoding via [`body`] module
//!
//! - Response handling:
//!   - [`ResponseEncoder`]: encodes buffered responses
//!
//! # Example
//!
//! ```
//! use coro_http::codec::{FrameReader, HeaderEnd};
//!
//! let mut reader = FrameReader::new();
//! reader.extend(b"GET / HTTP/1.1\r\nHost: a\r\n");
//! assert_eq!(reader.have_end(), None);
//!
//! reader.extend(b"\r\n");
//! assert_eq!(reader.have_end(), Some(HeaderEnd { offset: 23, len: 4 }));
//! assert_eq!(reader.parse_headers().unwrap(), 0);
//! assert_eq!(reader.header().unwrap().headers()["host"], "a");
//! ```

mod body;
mod frame_reader;
mod header;
mod response_encoder;

pub use frame_reader::{FrameReader, HeaderEnd, Source};
pub use header::{HeaderDecoder, HeaderEncoder};
pub use response_encoder::ResponseEncoder;
