//! HTTP request body decoding.
//!
//! - `ChunkedDecoder`: chunked transfer coding, trailers kept
//! - `LengthDecoder`: fixed `Content-Length` payloads
//! - [`PayloadDecoder`]: dispatches to one of the above by [`PayloadSize`](crate::protocol::PayloadSize)

mod chunked_decoder;
mod length_decoder;
mod payload_decoder;

pub use payload_decoder::PayloadDecoder;
