use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use http::header::{CONNECTION, EXPECT};
use http::{HeaderValue, Method, Request, Response, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{Assembler, Incoming, Tokenizer};
use crate::connection::inbound::InboundBody;
use crate::connection::message_writer::MessageWriter;
use crate::connection::{ConnectionConfig, Intent, KeepAlive, Pipeline, Ticket, apply_to_response};
use crate::handler::Handler;
use crate::protocol::body::Body;
use crate::protocol::{ConnectionInfo, HttpError, ParseError, PipelineError};

type Served = Result<(u64, KeepAlive), HttpError>;

/// The server side of an HTTP/1.x connection.
///
/// `ServerConnection` reads pipelined requests and hands each one to the
/// handler as soon as its headers are complete, so handlers of consecutive
/// requests run concurrently. Responses are still written strictly in request
/// order: each waits until the previous response finished writing.
///
/// The connection also:
/// - answers `Expect: 100-continue` right before the handler runs
/// - turns handler errors into `500 Internal Server Error`
/// - answers malformed input with `400 Bad Request` and closes
/// - closes after the response when either side asked for it, reading no
///   further requests once that is decided
/// - tears down after the configured idle timeout, which only runs while no
///   request is in flight
/// - stops reading while an unread request body buffers past the configured
///   high water mark
///
/// # Type Parameters
///
/// * `R`: The async readable stream type
/// * `W`: The async writable stream type
pub struct ServerConnection<R, W> {
    framed_read: FramedRead<R, Tokenizer>,
    writer: MessageWriter<W>,
    config: ConnectionConfig,
    peer_addr: Option<SocketAddr>,
}

impl<R, W> ServerConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_config(reader, writer, ConnectionConfig::default())
    }

    pub fn with_config(reader: R, writer: W, config: ConnectionConfig) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, Tokenizer::requests(), config.read_buffer),
            writer: MessageWriter::new(writer),
            config,
            peer_addr: None,
        }
    }

    /// Records the peer address handed to handlers in [`ConnectionInfo`].
    #[must_use]
    pub fn peer_addr(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    /// Serves requests until the connection closes.
    ///
    /// Returns `Ok(())` when the peer or a `Connection: close` ended the
    /// connection, or when it idled out between requests. Idling out in the
    /// middle of a request head or body is an [`HttpError::Timeout`].
    pub async fn process<H>(self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
        W: Send,
    {
        let Self { mut framed_read, writer, config, peer_addr } = self;
        let writer = Mutex::new(writer);
        let pipeline = Pipeline::new(config.idle_timeout);
        let mut assembler = Assembler::new();
        let mut in_flight: FuturesUnordered<BoxFuture<'_, Served>> = FuturesUnordered::new();
        let mut inbound: Option<(u64, InboundBody)> = None;
        let mut reading = true;
        let mut closing = false;
        let mut failure: Option<ParseError> = None;

        loop {
            if !reading && in_flight.is_empty() {
                break;
            }

            let paused = inbound.as_ref().is_some_and(|(_, body)| body.throttle());
            let room = inbound.is_some() || (pipeline.is_accepting() && pipeline.len() < config.max_pipelined);
            let can_read = reading && !paused && room;

            tokio::select! {
                token = framed_read.next(), if can_read => match token {
                    Some(Ok(token)) => {
                        pipeline.touch();
                        let message_complete = token.is_message_complete();

                        match assembler.feed(token) {
                            Ok(Some(Incoming::Request(mut request))) => {
                                let intent = Intent::of(request.version(), request.headers());
                                let body = request.body().clone();
                                let ticket = match pipeline.enter(Some(body.clone())) {
                                    Ok(ticket) => ticket,
                                    Err(e) => {
                                        debug!(cause = %e, "dropping request read after close");
                                        body.abort();
                                        reading = false;
                                        continue;
                                    }
                                };

                                let id = ticket.id();
                                trace!(id, method = %request.method(), uri = %request.uri(), "request received");
                                request.extensions_mut().insert(ConnectionInfo { sequence: id, intent, peer_addr });
                                if !body.is_write_closed() {
                                    inbound = Some((id, InboundBody::new(body, config.body_high_water)));
                                }
                                if intent == Intent::Close || !config.keep_alive {
                                    closing = true;
                                }

                                in_flight.push(serve(Arc::clone(&handler), request, ticket, &pipeline, &writer, config.keep_alive).boxed());
                            }
                            Ok(_) => {}
                            Err(e) => {
                                fail_reading(&mut assembler, &pipeline, &mut inbound, &mut reading);
                                failure = Some(e);
                                continue;
                            }
                        }

                        if message_complete {
                            inbound = None;
                            if closing {
                                debug!("request asked to close, no more reads");
                                reading = false;
                            }
                        }
                    }

                    Some(Err(e)) => {
                        warn!(cause = %e, "can't receive next request");
                        fail_reading(&mut assembler, &pipeline, &mut inbound, &mut reading);
                        failure = Some(e);
                    }

                    None => {
                        debug!("peer finished sending requests");
                        if let Some((_, body)) = inbound.take() {
                            body.abort();
                        }
                        reading = false;
                    }
                },

                Some(served) = in_flight.next() => match served {
                    Ok((id, KeepAlive::Open)) => {
                        if let Some((receiving, body)) = inbound.as_mut() {
                            if *receiving == id {
                                body.release();
                            }
                        }
                    }

                    Ok((id, KeepAlive::Close)) => {
                        debug!(id, "closing connection after response");
                        reading = false;
                        pipeline.fail_all();
                        if let Some((_, body)) = inbound.take() {
                            body.abort();
                        }
                    }

                    Err(HttpError::Pipeline { source: PipelineError::Aborted }) => {
                        trace!("dropped request of a torn down pipeline");
                    }

                    Err(e) => {
                        error!(cause = %e, "failed to serve request, connection shutdown");
                        pipeline.fail_all();
                        if let Some((_, body)) = inbound.take() {
                            body.abort();
                        }
                        return Err(e);
                    }
                },

                () = async { if let Some((_, body)) = &inbound { body.until_resumed().await } }, if paused => {
                    trace!("body was read, reading again");
                }

                () = pipeline.idle() => {
                    if !pipeline.is_expired() {
                        continue;
                    }

                    let busy = inbound.is_some() || !framed_read.decoder().is_idle() || !framed_read.read_buffer().is_empty();
                    info!(busy, "connection idle timeout");
                    pipeline.fail_all();
                    if let Some((_, body)) = inbound.take() {
                        body.abort();
                    }
                    return match config.idle_timeout {
                        Some(timeout) if busy => Err(HttpError::Timeout(timeout)),
                        _ => Ok(()),
                    };
                }
            }
        }

        if let Some(e) = failure {
            let mut response = build_error_response(StatusCode::BAD_REQUEST);
            response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
            if let Err(write_error) = writer.lock().await.write_response(&response, false).await {
                debug!(cause = %write_error, "could not answer malformed request");
            }
            return Err(e.into());
        }

        info!("finished process, connection shutdown");
        Ok(())
    }
}

fn fail_reading(
    assembler: &mut Assembler,
    pipeline: &Pipeline,
    inbound: &mut Option<(u64, InboundBody)>,
    reading: &mut bool,
) {
    assembler.reset();
    if let Some((_, body)) = inbound.take() {
        body.abort();
    }
    pipeline.stop_accepting();
    *reading = false;
}

/// One request's whole cycle: continue, handler, ordered write.
async fn serve<H, W>(
    handler: Arc<H>,
    request: Request<Body>,
    mut ticket: Ticket,
    pipeline: &Pipeline,
    writer: &Mutex<MessageWriter<W>>,
    keep_alive: bool,
) -> Served
where
    H: Handler,
    W: AsyncWrite + Unpin + Send,
{
    let id = ticket.id();
    let version = request.version();
    let intent = Intent::of(version, request.headers());
    let suppress_body = request.method() == Method::HEAD;

    if expects_continue(&request) && !request.body().is_write_closed() {
        ticket.wait_predecessor().await?;
        let _writing = ticket.begin_write();
        writer.lock().await.write_continue(version).await?;
        info!(id, "receive expect request header, sent continue response");
    }

    let mut response = match handler.call(request).await {
        Ok(response) => response.map(Into::into),
        Err(e) => {
            let cause: Box<dyn Error + Send + Sync> = e.into();
            error!(id, %cause, "handle response error");
            build_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };

    ticket.wait_predecessor().await?;
    let decision = apply_to_response(intent, &mut response, keep_alive);
    if !decision.is_open() {
        debug!(id, "response closes the connection, accepting no more requests");
        pipeline.stop_accepting();
    }
    {
        let _writing = ticket.begin_write();
        writer.lock().await.write_response(&response, suppress_body).await?;
    }
    ticket.complete();
    trace!(id, ?decision, status = response.status().as_u16(), "response written");
    Ok((id, decision))
}

fn expects_continue<T>(request: &Request<T>) -> bool {
    request.version() >= Version::HTTP_11
        && request.headers().get(EXPECT).is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
}

fn build_error_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

impl<R, W> std::fmt::Debug for ServerConnection<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("config", &self.config)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}
