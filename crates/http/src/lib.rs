//! An asynchronous HTTP/1.x protocol engine with pipelining
//!
//! This crate turns a byte transport into a stream of HTTP messages and back,
//! for servers and clients alike. Several requests may be in flight on one
//! connection at once: they are handled concurrently while their responses
//! still reach the wire in request order.
//!
//! # Features
//!
//! - HTTP/1.0 and HTTP/1.1 with keep-alive negotiation
//! - Request pipelining with ordered responses
//! - Streaming request and response bodies with read backpressure
//! - Chunked transfer encoding, including trailers
//! - Expect-continue mechanism
//! - Idle timeouts that only run between messages
//! - Zero-copy header parsing
//!
//! # Example
//!
//! ```no_run
//! use http::{Request, Response, StatusCode};
//! use std::error::Error;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn, Level};
//! use tracing_subscriber::FmtSubscriber;
//! use pipeline_http::connection::ServerConnection;
//! use pipeline_http::handler::make_handler;
//! use pipeline_http::protocol::body::Body;
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder()
//!         .with_max_level(Level::INFO)
//!         .finish();
//!     tracing::subscriber::set_global_default(subscriber)
//!         .expect("setting default subscriber failed");
//!
//!     info!(port = 8080, "start listening");
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(make_handler(hello_world));
//!
//!     loop {
//!         let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let handler = handler.clone();
//!
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             let connection = ServerConnection::new(reader, writer).peer_addr(remote_addr);
//!             match connection.process(handler).await {
//!                 Ok(()) => info!("finished process, connection shutdown"),
//!                 Err(e) => error!(cause = %e, "service has error, connection shutdown"),
//!             }
//!         });
//!     }
//! }
//!
//! async fn hello_world(request: Request<Body>) -> Result<Response<Body>, Box<dyn Error + Send + Sync>> {
//!     info!(path = request.uri().path(), "receiving request");
//!
//!     let body = request.body().to_bytes().await;
//!     info!(len = body.len(), "received request body");
//!
//!     let response = Response::builder()
//!         .status(StatusCode::OK)
//!         .body(Body::full("Hello World!\r\n"))?;
//!     Ok(response)
//! }
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`protocol`]: message types, errors and the streaming [`protocol::body::Body`]
//! - [`codec`]: the tokenizer, the message assembler and the message builder
//! - [`connection`]: pipelining, keep-alive and the server and client drivers
//! - [`handler`]: the request handler trait and utilities
//!
//! # Core Components
//!
//! ## Parsing
//!
//! Inbound bytes are split into tokens by [`codec::Tokenizer`], a
//! `tokio_util` decoder. [`codec::Assembler`] builds messages from those
//! tokens and fills their bodies while the rest of the message arrives.
//!
//! ## Serialization
//!
//! [`codec::Builder`] writes messages as an ordered sequence of calls (start
//! line, headers, body chunks, trailers) and picks the framing on the fly:
//! `Content-Length` when the length is known up front, chunked otherwise.
//!
//! ## Pipelining
//!
//! [`connection::Pipeline`] hands every message a ticket. A message may only
//! be written once the message before it finished writing, so concurrent
//! handlers never interleave their output.
//!
//! ## Error Handling
//!
//! - [`protocol::HttpError`]: Top-level error type
//! - [`protocol::ParseError`]: Malformed input, fatal to the connection
//! - [`protocol::BuildError`]: Misuse of the builder API
//! - [`protocol::SendError`]: Transport write failures
//! - [`protocol::PipelineError`]: Messages refused or torn down by the pipeline
//!
//! # Limitations
//!
//! - HTTP/1.x only
//! - No TLS support (use a reverse proxy for HTTPS)
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
