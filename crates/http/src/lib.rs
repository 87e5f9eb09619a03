//! A single-threaded coroutine HTTP runtime
//!
//! This crate multiplexes many client connections over one Linux `epoll` instance.
//! Each connection is a task written as plain sequential code; a read or write
//! that would block suspends the task and the scheduler resumes it once the
//! socket is ready or one of its deadlines expires. There is exactly one thread
//! and exactly one task running at any instant.
//!
//! # Example
//!
//! ```no_run
//! use std::convert::Infallible;
//! use std::os::fd::AsRawFd;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use tracing::{info, warn};
//! use coro_http::connection::{ConnectionConfig, HttpConnection};
//! use coro_http::handler::make_handler;
//! use coro_http::net::{listen, parse_ip};
//! use coro_http::runtime::{Ready, Scheduler, SchedulerConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut scheduler = Scheduler::new(SchedulerConfig::default())?;
//!     let timer = scheduler.add_timer(Duration::from_secs(60), Duration::from_millis(100));
//!     let config = ConnectionConfig::default().with_header_read(timer, Duration::from_secs(5));
//!
//!     let handler = Rc::new(make_handler(|req: Request<Bytes>| {
//!         Ok::<_, Infallible>(Response::new(format!("hello {}\n", req.uri().path())))
//!     }));
//!
//!     let listener = listen(parse_ip("127.0.0.1", 8080)?, 128, false)?;
//!     scheduler.spawn(listener.as_raw_fd(), Ready::READABLE, move |ctx| async move {
//!         while let Ok((stream, peer)) = ctx.accept(&listener).await {
//!             let handler = Rc::clone(&handler);
//!             ctx.spawn(stream.as_raw_fd(), Ready::READABLE, move |ctx| async move {
//!                 let connection = HttpConnection::new(stream, handler, config);
//!                 match connection.process(&ctx).await {
//!                     Ok(()) => info!(%peer, "connection finished"),
//!                     Err(e) => warn!(%peer, cause = %e, "connection failed"),
//!                 }
//!             });
//!         }
//!     })?;
//!
//!     scheduler.run()?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! Leaf to root:
//!
//! - [`coroutine`]: stackless coroutines that suspend and resume with typed values
//! - [`timer`]: hashed timer wheel with catch-up sweeps
//! - [`codec`]: incremental request framing ([`codec::FrameReader`]) and response encoding
//! - [`protocol`]: request/response types and error types
//! - [`runtime`]: the [`runtime::Scheduler`], the epoll poller and [`runtime::TaskContext`]
//! - [`connection`]: the HTTP/1.x connection task
//! - [`handler`]: request handler trait
//! - [`net`]: listening socket setup
//!
//! # Error Handling
//!
//! - [`runtime::TaskError`]: a deadline expired or the socket failed
//! - [`protocol::ParseError`]: request parsing errors
//! - [`protocol::SendError`]: response sending errors
//! - [`protocol::HttpError`]: top-level connection error
//!
//! # Limitations
//!
//! - Linux only
//! - HTTP/1.0 and HTTP/1.1 only, no TLS
//! - Request and response bodies are buffered whole
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64

pub mod codec;
pub mod connection;
pub mod coroutine;
pub mod handler;
pub mod net;
pub mod protocol;
pub mod runtime;
pub mod timer;

mod utils;
pub(crate) use utils::ensure;
