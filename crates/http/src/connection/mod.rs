//! HTTP connection handling module
//!
//! This module runs the HTTP/1.x protocol over one accepted socket, inside a
//! scheduler task.
//!
//! # Components
//!
//! - [`HttpConnection`]: reads requests with a [`FrameReader`](crate::codec::FrameReader),
//!   hands them to a [`Handler`](crate::handler::Handler) and writes the responses back,
//!   honoring keep-alive, pipelining and `Expect: 100-continue`
//! - [`ConnectionConfig`]: per-phase deadlines
//! - [`Trailers`]: request extension carrying the trailer fields of a chunked body

mod http_connection;

pub use http_connection::{ConnectionConfig, HttpConnection, Trailers};
