use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use http_body::Frame;
use http_body_util::BodyExt;
use tracing::warn;

use crate::protocol::body::Body;

/// One subscription to a [`Body`].
///
/// Yields the replayed content followed by live chunks and ends once the body
/// is write-closed. Usable both as a `futures::Stream` and as an
/// `http_body::Body`.
#[derive(Debug)]
pub struct BodyStream {
    receiver: mpsc::UnboundedReceiver<Bytes>,
}

impl BodyStream {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self { receiver }
    }
}

impl Stream for BodyStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl http_body::Body for BodyStream {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.receiver.poll_next_unpin(cx).map(|chunk| chunk.map(|bytes| Ok(Frame::data(bytes))))
    }
}

/// Copies an external source into a [`Body`], closing it at the end.
///
/// Must be polled to completion (spawned or joined) for the body to fill.
pub struct BodyPump {
    inner: BoxFuture<'static, ()>,
}

impl Future for BodyPump {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl std::fmt::Debug for BodyPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyPump").finish_non_exhaustive()
    }
}

impl Body {
    /// Normalises a stream of chunks into a body fed by the returned pump.
    pub fn from_stream<S>(stream: S) -> (Body, BodyPump)
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        let body = Body::new();
        let writer = body.clone();
        let inner = async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(chunk) = stream.next().await {
                writer.write(chunk);
            }
            writer.close_write();
        };
        (body, BodyPump { inner: inner.boxed() })
    }

    /// Normalises any `http_body::Body` into a body fed by the returned pump.
    ///
    /// Trailers are dropped; an error frame aborts the body.
    pub fn from_http_body<B>(source: B) -> (Body, BodyPump)
    where
        B: http_body::Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Display,
    {
        let body = Body::new();
        let writer = body.clone();
        let inner = async move {
            let mut source = source;
            loop {
                match source.frame().await {
                    Some(Ok(frame)) => {
                        if let Ok(data) = frame.into_data() {
                            writer.write(data);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(cause = %e, "body source failed, aborting body");
                        writer.abort();
                        return;
                    }
                    None => {
                        writer.close_write();
                        return;
                    }
                }
            }
        };
        (body, BodyPump { inner: inner.boxed() })
    }
}
