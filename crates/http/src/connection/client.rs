//! Client side of a connection.
//!
//! [`handshake`] splits a transport into a [`SendRequest`] handle, usable
//! from any task, and a [`ClientConnection`] driver future that must be
//! polled (usually spawned) for requests to make progress.
//!
//! Requests are written in submission order without waiting for earlier
//! responses. Responses carry no identifiers in HTTP/1.x, so they are
//! matched to requests by position.

use std::collections::VecDeque;
use std::fmt;

use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use http::header::CONNECTION;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{Assembler, Tokenizer};
use crate::connection::inbound::InboundBody;
use crate::connection::message_writer::MessageWriter;
use crate::connection::{ConnectionConfig, Intent, Pipeline, Ticket, negotiate};
use crate::protocol::body::Body;
use crate::protocol::{HttpError, ParseError, PipelineError};

type Responder = oneshot::Sender<Result<Response<Body>, HttpError>>;

struct Job {
    request: Request<Body>,
    respond: Responder,
}

/// Prepares a client connection over `reader` and `writer`.
pub fn handshake<R, W>(reader: R, writer: W, config: ConnectionConfig) -> (SendRequest, ClientConnection<R, W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let (jobs_tx, jobs) = mpsc::unbounded();
    let connection = ClientConnection {
        framed_read: FramedRead::with_capacity(reader, Tokenizer::responses(), config.read_buffer),
        writer: MessageWriter::new(writer),
        jobs,
        config,
    };
    (SendRequest { jobs: jobs_tx }, connection)
}

/// Submits requests to a [`ClientConnection`].
#[derive(Clone)]
pub struct SendRequest {
    jobs: mpsc::UnboundedSender<Job>,
}

impl SendRequest {
    /// Sends `request` and waits for the head of its response; the response
    /// body keeps filling in the background.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<Body>, HttpError> {
        let (respond, response) = oneshot::channel();
        self.jobs.unbounded_send(Job { request, respond }).map_err(|_closed| HttpError::ConnectionClosed)?;
        response.await.map_err(|oneshot::Canceled| HttpError::ConnectionClosed)?
    }

    /// Like [`send`](SendRequest::send), but 4xx and 5xx responses are
    /// errors.
    pub async fn request_checked(&self, request: Request<Body>) -> Result<Response<Body>, HttpError> {
        let response = self.send(request).await?;
        let status = response.status();
        if status.is_client_error() {
            return Err(HttpError::ClientError(status));
        }
        if status.is_server_error() {
            return Err(HttpError::ServerError(status));
        }
        Ok(response)
    }

    /// Whether the driver is gone and every send would fail.
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

impl fmt::Debug for SendRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendRequest").field("closed", &self.is_closed()).finish()
    }
}

/// A request waiting for (the rest of) its response.
struct Pending {
    id: u64,
    method: Method,
    intent: Intent,
    respond: Option<Responder>,
}

/// Drives one client connection: writes submitted requests and routes
/// responses back to their senders.
pub struct ClientConnection<R, W> {
    framed_read: FramedRead<R, Tokenizer>,
    writer: MessageWriter<W>,
    jobs: mpsc::UnboundedReceiver<Job>,
    config: ConnectionConfig,
}

impl<R, W> ClientConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    /// Runs until every [`SendRequest`] is dropped and all responses are in,
    /// or until the connection closes.
    ///
    /// Requests outstanding when the connection closes fail with
    /// [`HttpError::ConnectionClosed`]. The idle timeout only runs while no
    /// request waits for its response.
    pub async fn run(self) -> Result<(), HttpError> {
        let Self { mut framed_read, writer, mut jobs, config } = self;
        let writer = Mutex::new(writer);
        let pipeline = Pipeline::new(config.idle_timeout);
        let mut assembler = Assembler::new();
        let mut writes: FuturesUnordered<BoxFuture<'_, Result<u64, HttpError>>> = FuturesUnordered::new();
        let mut pending: VecDeque<Pending> = VecDeque::new();
        let mut receiving: Option<InboundBody> = None;
        let mut interim = false;
        let mut jobs_done = false;
        let mut closing = false;

        loop {
            if (jobs_done || closing) && pending.is_empty() {
                break;
            }

            let paused = receiving.as_ref().is_some_and(InboundBody::throttle);
            let can_send = !jobs_done && !closing && pending.len() < config.max_pipelined;

            tokio::select! {
                job = jobs.next(), if can_send => {
                    let Some(Job { mut request, respond }) = job else {
                        debug!("every request handle dropped");
                        jobs_done = true;
                        continue;
                    };

                    let intent = prepare(&mut request, config.keep_alive);
                    let ticket = match pipeline.enter(None) {
                        Ok(ticket) => ticket,
                        Err(e) => {
                            debug!(cause = %e, "refusing request on a closing connection");
                            let _ = respond.send(Err(HttpError::ConnectionClosed));
                            continue;
                        }
                    };

                    let id = ticket.id();
                    trace!(id, method = %request.method(), uri = %request.uri(), "sending request");
                    framed_read.decoder_mut().expect_response(request.method());
                    pending.push_back(Pending { id, method: request.method().clone(), intent, respond: Some(respond) });
                    if intent == Intent::Close {
                        closing = true;
                        pipeline.stop_accepting();
                    }
                    writes.push(write_request(request, ticket, &writer).boxed());
                },

                Some(written) = writes.next() => match written {
                    Ok(id) => trace!(id, "request written"),
                    Err(HttpError::Pipeline { source: PipelineError::Aborted }) => {
                        trace!("dropped request of a torn down pipeline");
                    }
                    Err(e) => {
                        error!(cause = %e, "failed to send request, connection shutdown");
                        fail_pending(&mut pending, &pipeline);
                        return Err(e);
                    }
                },

                token = framed_read.next(), if !paused => match token {
                    Some(Ok(token)) => {
                        pipeline.touch();
                        let message_complete = token.is_message_complete();

                        match assembler.feed(token) {
                            Ok(Some(incoming)) => {
                                let Some(response) = incoming.into_response() else {
                                    continue;
                                };
                                if response.status().is_informational() {
                                    trace!(status = response.status().as_u16(), "skipping interim response");
                                    interim = true;
                                    continue;
                                }

                                let Some(entry) = pending.front_mut() else {
                                    warn!(status = response.status().as_u16(), "response without a request");
                                    fail_pending(&mut pending, &pipeline);
                                    return Err(ParseError::unexpected_token("no request is outstanding", "status line").into());
                                };

                                let status = response.status();
                                if entry.method == Method::HEAD || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
                                    response.body().close_write();
                                }
                                if !negotiate(entry.intent, Intent::of(response.version(), response.headers())).is_open() {
                                    debug!(id = entry.id, "response closes the connection");
                                    closing = true;
                                    pipeline.stop_accepting();
                                }

                                let body = response.body().clone();
                                pipeline.attach_body(entry.id, body.clone());
                                let mut inbound = (!body.is_write_closed()).then(|| InboundBody::new(body, config.body_high_water));
                                let delivered = entry.respond.take().is_some_and(|respond| respond.send(Ok(response)).is_ok());
                                if !delivered {
                                    trace!(id = entry.id, "response no longer awaited, draining it");
                                    if let Some(inbound) = inbound.as_mut() {
                                        inbound.release();
                                    }
                                }
                                receiving = inbound;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                fail_pending(&mut pending, &pipeline);
                                return Err(e.into());
                            }
                        }

                        if message_complete {
                            receiving = None;
                            if interim {
                                interim = false;
                            } else if let Some(entry) = pending.pop_front() {
                                pipeline.complete(entry.id);
                                trace!(id = entry.id, "response complete");
                                if closing {
                                    fail_pending(&mut pending, &pipeline);
                                }
                            }
                        }
                    }

                    Some(Err(e)) => {
                        warn!(cause = %e, "can't receive next response");
                        fail_pending(&mut pending, &pipeline);
                        return Err(e.into());
                    }

                    None => {
                        let outstanding = pending.len();
                        info!(outstanding, "server closed the connection");
                        fail_pending(&mut pending, &pipeline);
                        return if outstanding == 0 { Ok(()) } else { Err(HttpError::ConnectionClosed) };
                    }
                },

                () = async { if let Some(body) = &receiving { body.until_resumed().await } }, if paused => {
                    trace!("response body was read, reading again");
                }

                () = pipeline.idle() => {
                    if !pipeline.is_expired() {
                        continue;
                    }

                    let busy = !framed_read.decoder().is_idle() || !framed_read.read_buffer().is_empty();
                    info!(busy, "connection idle timeout");
                    fail_pending(&mut pending, &pipeline);
                    return match config.idle_timeout {
                        Some(timeout) if busy => Err(HttpError::Timeout(timeout)),
                        _ => Ok(()),
                    };
                }
            }
        }

        info!("finished process, connection shutdown");
        Ok(())
    }
}

impl<R, W> fmt::Debug for ClientConnection<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection").field("config", &self.config).finish_non_exhaustive()
    }
}

/// Stamps the `Connection` header of an outgoing request and returns its
/// intent.
fn prepare(request: &mut Request<Body>, keep_alive: bool) -> Intent {
    if !keep_alive {
        request.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
    } else if !request.headers().contains_key(CONNECTION) {
        request.headers_mut().insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    }
    Intent::of(request.version(), request.headers())
}

async fn write_request<W>(request: Request<Body>, mut ticket: Ticket, writer: &Mutex<MessageWriter<W>>) -> Result<u64, HttpError>
where
    W: AsyncWrite + Unpin + Send,
{
    ticket.wait_predecessor().await?;
    {
        let _writing = ticket.begin_write();
        writer.lock().await.write_request(&request).await?;
    }
    ticket.finish_write();
    Ok(ticket.id())
}

/// Fails every outstanding request and tears the pipeline down, aborting
/// response bodies still filling.
fn fail_pending(pending: &mut VecDeque<Pending>, pipeline: &Pipeline) {
    for entry in pending.drain(..) {
        if let Some(respond) = entry.respond {
            let _ = respond.send(Err(HttpError::ConnectionClosed));
        }
    }
    pipeline.fail_all();
}
