//! HTTP connection handling module
//!
//! This module drives the codec over a transport, for both sides of a
//! connection:
//!
//! - [`ServerConnection`]: reads pipelined requests, runs the handler for
//!   each of them concurrently and writes the responses back in order
//! - [`handshake`]: splits a client transport into a [`SendRequest`] handle
//!   and the [`ClientConnection`] driver
//!
//! Both sides share the same machinery:
//!
//! - [`Pipeline`]: keeps the messages of one connection in order and owns the
//!   connection's [`IdleTimer`]
//! - [`negotiate`] and [`apply_to_response`]: the keep-alive policy
//! - [`ConnectionConfig`]: timeouts, buffer sizes and limits

mod client;
mod config;
mod inbound;
mod keep_alive;
mod message_writer;
mod pipeline;
mod server;

pub use client::{ClientConnection, SendRequest, handshake};
pub use config::ConnectionConfig;
pub use keep_alive::{Intent, KeepAlive, apply_to_response, negotiate};
pub use message_writer::MessageWriter;
pub use pipeline::{IdleTimer, Pipeline, Ticket, WriteGuard};
pub use server::ServerConnection;
