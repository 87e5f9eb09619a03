//! Collaborators of the `coro-server` binary.
//!
//! - [`encoding`]: streaming gzip and zlib compression over `flate2`
//! - [`handler`]: the echo request handler
//! - [`config`]: command line configuration
//! - [`server`]: listener tasks wired onto a scheduler

pub mod config;
pub mod encoding;
pub mod handler;
pub mod server;

pub use config::ServerConfig;
pub use server::Server;
