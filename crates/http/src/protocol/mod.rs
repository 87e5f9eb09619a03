//! Core HTTP protocol abstractions.
//!
//! - **Message Handling** (`message`): payload items and payload sizes
//! - **Request Processing** (`request`): [`RequestHeader`] with keep-alive and
//!   `Expect` inspection
//! - **Response Processing** (`response`): [`ResponseHead`] and protocol replies
//! - **Error Handling** (`error`): [`HttpError`], [`ParseError`], [`SendError`]
//!
//! Timeouts raised by the runtime surface here as [`ParseError::Task`] while a
//! request is being read and as [`SendError::Task`] while a response is written,
//! so a caller can tell an idle client from a stalled one.

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::ResponseHead;
pub use response::status_response;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
