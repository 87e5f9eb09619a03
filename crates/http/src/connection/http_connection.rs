use std::error::Error;
use std::io::{Read, Write};
use std::rc::Rc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, HeaderValue};
use http::{HeaderMap, Response, StatusCode, Version};
use tokio_util::codec::Encoder;
use tracing::{debug, error, info};

use crate::codec::{FrameReader, ResponseEncoder, Source};
use crate::handler::Handler;
use crate::protocol::{HttpError, ParseError, SendError, status_response};
use crate::runtime::{TaskContext, TimerId};

const READ_CHUNK: usize = 4 * 1024;
const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Deadline of one phase: the wheel to arm and the delay.
pub type Deadline = Option<(TimerId, Duration)>;

/// Per-phase deadlines of a connection. A phase without one may wait forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Receiving the first request head.
    pub header_read: Deadline,
    /// Idle time between requests, until the next head is complete.
    pub keep_alive: Deadline,
    /// Receiving a request body.
    pub body_read: Deadline,
    /// Writing a response.
    pub write: Deadline,
}

impl ConnectionConfig {
    #[must_use]
    pub fn with_header_read(mut self, timer: TimerId, delay: Duration) -> Self {
        self.header_read = Some((timer, delay));
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, timer: TimerId, delay: Duration) -> Self {
        self.keep_alive = Some((timer, delay));
        self
    }

    #[must_use]
    pub fn with_body_read(mut self, timer: TimerId, delay: Duration) -> Self {
        self.body_read = Some((timer, delay));
        self
    }

    #[must_use]
    pub fn with_write(mut self, timer: TimerId, delay: Duration) -> Self {
        self.write = Some((timer, delay));
        self
    }
}

/// Trailer fields of a chunked request body, attached as a request extension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trailers(pub HeaderMap);

/// An HTTP/1.x connection served by one scheduler task.
///
/// Requests are read completely (head and body) before the handler runs; the
/// response is buffered and written back before the next request is read.
/// Bytes of pipelined requests that arrive early are kept for the next turn.
///
/// # Type Parameters
///
/// * `S`: the non-blocking socket
/// * `H`: the request handler
pub struct HttpConnection<S, H> {
    stream: S,
    handler: Rc<H>,
    reader: FrameReader,
    encoder: ResponseEncoder,
    out: BytesMut,
    config: ConnectionConfig,
}

impl<S, H> std::fmt::Debug for HttpConnection<S, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection").field("reader", &self.reader).field("config", &self.config).finish_non_exhaustive()
    }
}

impl<S, H> HttpConnection<S, H>
where
    S: Read + Write,
    H: Handler<Bytes>,
{
    pub fn new(stream: S, handler: Rc<H>, config: ConnectionConfig) -> Self {
        Self { stream, handler, reader: FrameReader::new(), encoder: ResponseEncoder::new(), out: BytesMut::new(), config }
    }

    /// Serves requests until the peer closes, asks to close, or something fails.
    ///
    /// A malformed request is answered with `400 Bad Request` before the error is
    /// returned. The socket is dropped when the owning task ends.
    pub async fn process(mut self, ctx: &TaskContext) -> Result<(), HttpError> {
        let mut served = 0u64;

        loop {
            let wait = if served == 0 { self.config.header_read } else { self.config.keep_alive };
            arm(ctx, wait);
            let received = self.reader.read_header(&mut StreamSource { ctx, stream: &mut self.stream }).await;
            disarm(ctx, wait);

            match received {
                Ok(true) => {}
                Ok(false) => {
                    debug!(fd = ctx.fd(), served, "peer closed the connection");
                    return Ok(());
                }
                Err(e) => return self.reject(ctx, e).await,
            }

            if let Err(e) = self.reader.parse_headers() {
                return self.reject(ctx, e).await;
            }
            let Some(header) = self.reader.header() else {
                return self.reject(ctx, ParseError::invalid_header("request head missing after parse")).await;
            };
            let mut keep_alive = header.is_keep_alive();
            let version = header.version();
            let expects_continue = version == Version::HTTP_11 && header.expects_continue();
            info!(method = %header.method(), uri = %header.uri(), ?version, "request received");

            let has_payload = self.reader.payload_size().is_some_and(|size| !size.is_empty());
            if expects_continue && has_payload {
                self.write_out(ctx, CONTINUE).await?;
                debug!("sent 100 continue");
            }

            arm(ctx, self.config.body_read);
            let body_read = self.reader.read_payload(&mut StreamSource { ctx, stream: &mut self.stream }).await;
            disarm(ctx, self.config.body_read);
            if let Err(e) = body_read {
                return self.reject(ctx, e).await;
            }

            let Some(header) = self.reader.take_header() else {
                return Err(ParseError::invalid_header("request head missing after body").into());
            };
            let mut request = header.body(self.reader.take_body());
            let trailers = self.reader.take_trailers();
            if !trailers.is_empty() {
                request.extensions_mut().insert(Trailers(trailers));
            }

            let mut response = match self.handler.call(request) {
                Ok(response) => response.map(Into::into),
                Err(e) => {
                    let e: Box<dyn Error + Send + Sync> = e.into();
                    error!(cause = %e, "handler failed");
                    status_response(StatusCode::INTERNAL_SERVER_ERROR, version)
                }
            };

            keep_alive &= !wants_close(response.headers());
            prepare_response(&mut response, version, keep_alive);
            self.send(ctx, response).await?;
            served += 1;

            if !keep_alive {
                debug!(fd = ctx.fd(), served, "closing connection");
                return Ok(());
            }
            self.reader.consume_frame();
        }
    }

    /// Answers a failed read with `400` when the input was malformed, then reports the error.
    async fn reject(&mut self, ctx: &TaskContext, e: ParseError) -> Result<(), HttpError> {
        if e.is_malformed() {
            error!(cause = %e, "malformed request");
            let mut response = status_response(StatusCode::BAD_REQUEST, Version::HTTP_11);
            prepare_response(&mut response, Version::HTTP_11, false);
            if let Err(send_error) = self.send(ctx, response).await {
                debug!(cause = %send_error, "could not deliver 400 response");
            }
        }
        Err(e.into())
    }

    async fn send(&mut self, ctx: &TaskContext, response: Response<Bytes>) -> Result<(), SendError> {
        let mut out = std::mem::take(&mut self.out);
        out.clear();
        self.encoder.encode(response, &mut out)?;
        let result = self.write_out(ctx, &out).await;
        self.out = out;
        result
    }

    async fn write_out(&mut self, ctx: &TaskContext, bytes: &[u8]) -> Result<(), SendError> {
        arm(ctx, self.config.write);
        let result = ctx.write_all(&mut self.stream, bytes).await;
        disarm(ctx, self.config.write);
        Ok(result?)
    }
}

fn arm(ctx: &TaskContext, deadline: Deadline) {
    if let Some((timer, delay)) = deadline {
        ctx.set_timer(timer, delay);
    }
}

fn disarm(ctx: &TaskContext, deadline: Deadline) {
    if let Some((timer, _)) = deadline {
        ctx.clear_timer(timer);
    }
}

fn wants_close(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .flat_map(|value| value.as_bytes().split(|&b| b == b','))
        .any(|token| token.trim_ascii().eq_ignore_ascii_case(b"close"))
}

fn prepare_response(response: &mut Response<Bytes>, version: Version, keep_alive: bool) {
    *response.version_mut() = if version == Version::HTTP_10 { Version::HTTP_10 } else { Version::HTTP_11 };
    let connection = if keep_alive { HeaderValue::from_static("keep-alive") } else { HeaderValue::from_static("close") };
    response.headers_mut().insert(CONNECTION, connection);
}

/// Socket reads that suspend the connection task while nothing is available.
struct StreamSource<'a, S> {
    ctx: &'a TaskContext,
    stream: &'a mut S,
}

impl<S: Read> Source for StreamSource<'_, S> {
    async fn fill(&mut self, buf: &mut BytesMut) -> Result<usize, ParseError> {
        let start = buf.len();
        buf.resize(start + READ_CHUNK, 0);

        match self.ctx.read(&mut *self.stream, &mut buf[start..]).await {
            Ok(n) => {
                buf.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                buf.truncate(start);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::make_handler;
    use crate::runtime::{Ready, Scheduler, SchedulerConfig};
    use http::Request;
    use indoc::indoc;
    use std::cell::RefCell;
    use std::net::Shutdown;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    type Outcome = Rc<RefCell<Option<Result<(), HttpError>>>>;

    fn echo(req: Request<Bytes>) -> Result<Response<String>, Box<dyn Error + Send + Sync>> {
        if req.uri().path() == "/fail" {
            return Err("handler refused".into());
        }
        let trailers = req.extensions().get::<Trailers>().map_or(0, |t| t.0.len());
        Ok(Response::new(format!("{} {} {} {trailers}", req.method(), req.uri().path(), req.body().len())))
    }

    /// Sends `input`, half-closes, runs the server task to completion and returns
    /// everything the server wrote plus the task's result.
    fn exchange(scheduler: &mut Scheduler, config: ConnectionConfig, input: &[u8], half_close: bool) -> (String, Outcome) {
        let (mut client, server) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();
        client.write_all(input).unwrap();
        if half_close {
            client.shutdown(Shutdown::Write).unwrap();
        }

        let outcome: Outcome = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&outcome);
        let handler = Rc::new(make_handler(echo));
        scheduler
            .spawn(server.as_raw_fd(), Ready::READABLE, move |ctx| async move {
                let connection = HttpConnection::new(server, handler, config);
                *sink.borrow_mut() = Some(connection.process(&ctx).await);
            })
            .unwrap();
        scheduler.run().unwrap();

        let mut output = String::new();
        client.read_to_string(&mut output).unwrap();
        (output, outcome)
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default()).unwrap()
    }

    #[test]
    fn pipelined_keep_alive_requests() {
        let input = indoc! {"
            GET /a HTTP/1.1\r
            Host: x\r
            \r
            POST /b HTTP/1.1\r
            Host: x\r
            Content-Length: 5\r
            \r
            hello"};
        let (output, outcome) = exchange(&mut scheduler(), ConnectionConfig::default(), input.as_bytes(), true);

        assert!(matches!(*outcome.borrow(), Some(Ok(()))));
        assert_eq!(output.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert_eq!(output.matches("connection: keep-alive\r\n").count(), 2);
        let first = output.find("GET /a 0 0").unwrap();
        let second = output.find("POST /b 5 0").unwrap();
        assert!(first < second);
        assert!(output.ends_with("POST /b 5 0"));
    }

    #[test]
    fn connection_close_stops_after_first_response() {
        let input = "GET /a HTTP/1.1\r\nConnection: close\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let (output, outcome) = exchange(&mut scheduler(), ConnectionConfig::default(), input.as_bytes(), false);

        assert!(matches!(*outcome.borrow(), Some(Ok(()))));
        assert!(output.contains("connection: close\r\n"));
        assert!(output.ends_with("GET /a 0 0"));
    }

    #[test]
    fn http10_closes_by_default() {
        let (output, _) = exchange(&mut scheduler(), ConnectionConfig::default(), b"GET /old HTTP/1.0\r\n\r\n", false);

        assert!(output.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(output.contains("connection: close\r\n"));
    }

    #[test]
    fn bare_lf_request_is_served() {
        let (output, _) = exchange(&mut scheduler(), ConnectionConfig::default(), b"GET /lf HTTP/1.1\nHost: x\n\n", true);
        assert!(output.ends_with("GET /lf 0 0"));
    }

    #[test]
    fn malformed_request_gets_400() {
        let input = b"GET / HTTP/1.1\r\nthis line has no colon\r\n\r\n";
        let (output, outcome) = exchange(&mut scheduler(), ConnectionConfig::default(), input, true);

        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(matches!(*outcome.borrow(), Some(Err(HttpError::RequestError { .. }))));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let input = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort";
        let (output, outcome) = exchange(&mut scheduler(), ConnectionConfig::default(), input, true);

        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(matches!(*outcome.borrow(), Some(Err(_))));
    }

    #[test]
    fn oversized_body_is_refused_unread() {
        let input = b"PUT / HTTP/1.1\r\nContent-Length: 9000000\r\n\r\nfirst bytes";
        let (output, outcome) = exchange(&mut scheduler(), ConnectionConfig::default(), input, true);

        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(matches!(
            *outcome.borrow(),
            Some(Err(HttpError::RequestError { source: ParseError::TooLargeBody { current_size: 9_000_000, .. } }))
        ));
    }

    #[test]
    fn handler_error_becomes_500() {
        let (output, outcome) = exchange(&mut scheduler(), ConnectionConfig::default(), b"GET /fail HTTP/1.1\r\n\r\n", true);

        assert!(output.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(matches!(*outcome.borrow(), Some(Ok(()))));
    }

    #[test]
    fn expect_continue_is_acknowledged() {
        let input = "PUT /up HTTP/1.1\r\nContent-Length: 3\r\nExpect: 100-continue\r\n\r\nabc";
        let (output, _) = exchange(&mut scheduler(), ConnectionConfig::default(), input.as_bytes(), true);

        assert!(output.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
        assert!(output.ends_with("PUT /up 3 0"));
    }

    #[test]
    fn chunked_trailers_reach_the_handler() {
        let input = indoc! {"
            POST /c HTTP/1.1\r
            Transfer-Encoding: chunked\r
            \r
            4\r
            Wiki\r
            5\r
            pedia\r
            0\r
            Expires: never\r
            \r
            "};
        let (output, _) = exchange(&mut scheduler(), ConnectionConfig::default(), input.as_bytes(), true);
        assert!(output.ends_with("POST /c 9 1"));
    }

    #[test]
    fn idle_client_hits_header_deadline() {
        let mut scheduler = scheduler();
        let timer = scheduler.add_timer(Duration::from_secs(1), Duration::from_millis(5));
        let config = ConnectionConfig::default().with_header_read(timer, Duration::from_millis(20));

        let (output, outcome) = exchange(&mut scheduler, config, b"GET / HTTP/1.1\r\n", false);

        assert!(output.is_empty());
        let outcome = outcome.borrow();
        let Some(Err(e)) = outcome.as_ref() else {
            panic!("expected a timeout");
        };
        assert_eq!(e.timeout(), Some(timer));
    }
}
