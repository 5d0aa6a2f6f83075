//! HTTP/1.x wire codec.
//!
//! Inbound bytes travel through two stages:
//!
//! - [`Tokenizer`]: a `tokio_util` [`Decoder`](tokio_util::codec::Decoder)
//!   splitting raw bytes into [`Token`]s (start line, headers, end of
//!   headers, body chunks, end of message)
//! - [`Assembler`]: builds [`Incoming`] requests or responses from those
//!   tokens and feeds their bodies
//!
//! Outbound messages are serialized by the [`Builder`] state machine, which
//! decides between chunked and identity framing as the message is written.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use http::{Method, Version};
//! use pipeline_http::codec::{Assembler, Builder, Tokenizer};
//!
//! let mut builder = Builder::new();
//! builder.request_line(&Method::GET, "/", Version::HTTP_11).unwrap();
//! builder.header("Host", "example.com", None).unwrap();
//! builder.complete().unwrap();
//!
//! let mut bytes = BytesMut::from(&builder.take_output()[..]);
//! let mut assembler = Assembler::new();
//! let request = assembler.drive(&mut Tokenizer::requests(), &mut bytes).unwrap().unwrap();
//! assert_eq!(request.into_request().unwrap().uri().path(), "/");
//! ```

mod assembler;
mod body;
mod builder;
mod tokenizer;

pub use assembler::{Assembler, AssemblerState, Incoming};
pub use body::{ChunkedDecoder, PayloadDecoder};
pub use builder::{Builder, BuilderState};
pub use tokenizer::{Token, Tokenizer};
