//! Streaming message bodies.
//!
//! Every request and response owns exactly one [`Body`]: an append-only buffer
//! that the side receiving the message fills and closes once, while any number
//! of readers either stream it ([`BodyStream`]) or wait for the complete
//! content.
//!
//! # Flow control
//!
//! The connection reading an inbound body attaches a [`BodySource`] (usually a
//! [`FlowControl`]) to it. When the body buffers too much with nobody
//! listening, the read loop pauses; the first reader that waits on the body
//! resumes it.
//!
//! # Body sources
//!
//! Whatever the application hands over as a body (bytes, a list of chunks, a
//! `Stream` or another `http_body::Body`) is normalised into a [`Body`] at the
//! boundary, see [`Body::from_stream`] and [`Body::from_http_body`].

#[allow(clippy::module_inception, reason = "the handle type lives beside its stream and flow helpers")]
mod body;
mod flow;
mod stream;

pub use body::Body;
pub use flow::{BodySource, FlowControl};
pub use stream::{BodyPump, BodyStream};
