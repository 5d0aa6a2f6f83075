//! The application seam of the server connection.
//!
//! A [`Handler`] turns one request into one response. The server connection
//! calls it concurrently for pipelined requests and takes care of writing the
//! responses back in request order.

use std::error::Error;
use std::future::Future;

use async_trait::async_trait;
use http::{Request, Response};

use crate::protocol::body::Body;

#[async_trait]
pub trait Handler: Send + Sync {
    type RespBody: Into<Body> + Send;
    type Error: Into<Box<dyn Error + Send + Sync>>;

    async fn call(&self, req: Request<Body>) -> Result<Response<Self::RespBody>, Self::Error>;
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<RespBody, Err, F, Fut> Handler for HandlerFn<F>
where
    RespBody: Into<Body> + Send,
    F: Fn(Request<Body>) -> Fut + Send + Sync,
    Err: Into<Box<dyn Error + Send + Sync>>,
    Fut: Future<Output = Result<Response<RespBody>, Err>> + Send,
{
    type RespBody = RespBody;
    type Error = Err;

    async fn call(&self, req: Request<Body>) -> Result<Response<Self::RespBody>, Self::Error> {
        (self.f)(req).await
    }
}

/// Wraps an async function into a [`Handler`].
pub fn make_handler<F, RespBody, Err, Ret>(f: F) -> HandlerFn<F>
where
    RespBody: Into<Body>,
    Err: Into<Box<dyn Error + Send + Sync>>,
    Ret: Future<Output = Result<Response<RespBody>, Err>>,
    F: Fn(Request<Body>) -> Ret,
{
    HandlerFn { f }
}
