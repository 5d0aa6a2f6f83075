use std::io;
use std::time::Duration;

use http::{StatusCode, Version};
use thiserror::Error;

use crate::codec::BuilderState;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("parse error: {source}")]
    Parse {
        #[from]
        source: ParseError,
    },

    #[error("build error: {source}")]
    Build {
        #[from]
        source: BuildError,
    },

    #[error("send error: {source}")]
    Send {
        #[from]
        source: SendError,
    },

    #[error("pipeline error: {source}")]
    Pipeline {
        #[from]
        source: PipelineError,
    },

    #[error("connection idle for more than {0:?}")]
    Timeout(Duration),

    #[error("connection closed before the message completed")]
    ConnectionClosed,

    #[error("client error response: {0}")]
    ClientError(StatusCode),

    #[error("server error response: {0}")]
    ServerError(StatusCode),
}

/// Malformed input reported by the tokenizer or the assembler.
///
/// Always fatal to the byte stream it was raised on.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid status code: {0}")]
    InvalidStatus(u16),

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("unexpected token {found} while {expected}")]
    UnexpectedToken { expected: &'static str, found: &'static str },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn unexpected_token(expected: &'static str, found: &'static str) -> Self {
        Self::UnexpectedToken { expected, found }
    }
}

/// Misuse of the [`Builder`](crate::codec::Builder) API by the application layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("`{operation}` called out of order while {state}")]
    OutOfOrder { operation: &'static str, state: BuilderState },

    #[error("trailing headers require chunked transfer encoding")]
    TrailersRequireChunked,

    #[error("body chunk written after trailing headers")]
    BodyAfterTrailers,

    #[error("unknown status code: {0}")]
    UnknownStatus(u16),

    #[error("unsupported http version: {0:?}")]
    UnsupportedVersion(Version),
}

impl BuildError {
    pub fn out_of_order(operation: &'static str, state: BuilderState) -> Self {
        Self::OutOfOrder { operation, state }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline no longer accepts messages")]
    Closed,

    #[error("pipeline was torn down before the predecessor finished")]
    Aborted,
}
