//! HTTP header processing: request head decoding and response head encoding.
//!
//! - [`HeaderDecoder`]: decodes a request head from raw bytes, enforcing the
//!   header count and size limits and choosing the payload framing
//! - [`HeaderEncoder`]: serializes a response status line and header fields

mod header_decoder;
mod header_encoder;

pub(crate) use header_decoder::{MAX_HEADER_BYTES, MAX_HEADER_NUM};
pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
