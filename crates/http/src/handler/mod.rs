//! Request handlers.
//!
//! A [`Handler`] turns a fully read request into a response. It runs on the
//! scheduler thread between two suspensions of its connection task, so it should
//! not block.

use std::error::Error;

use bytes::Bytes;
use http::{Request, Response};

pub trait Handler<ReqBody> {
    type RespBody: Into<Bytes>;
    type Error: Into<Box<dyn Error + Send + Sync>>;

    fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error>;
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<ReqBody, RespBody, Err, F> Handler<ReqBody> for HandlerFn<F>
where
    RespBody: Into<Bytes>,
    Err: Into<Box<dyn Error + Send + Sync>>,
    F: Fn(Request<ReqBody>) -> Result<Response<RespBody>, Err>,
{
    type RespBody = RespBody;
    type Error = Err;

    fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error> {
        (self.f)(req)
    }
}

pub fn make_handler<F, ReqBody, RespBody, Err>(f: F) -> HandlerFn<F>
where
    RespBody: Into<Bytes>,
    Err: Into<Box<dyn Error + Send + Sync>>,
    F: Fn(Request<ReqBody>) -> Result<Response<RespBody>, Err>,
{
    HandlerFn { f }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn closure_becomes_handler() {
        let handler = make_handler(|req: Request<Bytes>| Ok::<_, Infallible>(Response::new(req.into_body().len().to_string())));

        let response = handler.call(Request::new(Bytes::from_static(b"abc"))).unwrap();
        assert_eq!(response.body(), "3");
    }
}
