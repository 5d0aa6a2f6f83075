use std::net::SocketAddr;

use bytes::{Buf, Bytes};
use http::StatusCode;

use crate::connection::Intent;

/// Represents an item in an HTTP message payload stream.
///
/// Produced by the payload decoders: either a data chunk or the end of the
/// payload (EOF).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<Data: Buf = Bytes> {
    /// A chunk of payload data
    Chunk(Data),
    /// Marks the end of the payload stream
    Eof,
}

/// How the length of an inbound payload is delimited.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Payload with known length in bytes
    Length(u64),
    /// Payload using chunked transfer encoding
    Chunked,
    /// Empty payload (no body)
    Empty,
    /// Payload runs until the peer closes the connection
    UntilClose,
}

impl PayloadSize {
    #[inline]
    pub fn new_length(length: u64) -> Self {
        if length == 0 { PayloadSize::Empty } else { PayloadSize::Length(length) }
    }

    #[inline]
    pub fn new_chunked() -> Self {
        PayloadSize::Chunked
    }

    #[inline]
    pub fn new_empty() -> Self {
        PayloadSize::Empty
    }

    /// Returns true if the payload uses chunked transfer encoding
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    /// Returns true if the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }
}

impl<D: Buf> PayloadItem<D> {
    /// Returns true if this item represents the end of the payload stream
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    /// Returns true if this item contains chunk data
    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }
}

impl PayloadItem {
    /// Consumes the PayloadItem and returns the contained bytes if this is a Chunk
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}

/// Body content handed to the builder: one chunk or a finite sequence of chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Single(Bytes),
    Chunks(Vec<Bytes>),
}

impl Payload {
    pub fn into_chunks(self) -> Vec<Bytes> {
        match self {
            Payload::Single(bytes) => vec![bytes],
            Payload::Chunks(chunks) => chunks,
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Single(bytes)
    }
}

impl From<&'static str> for Payload {
    fn from(str: &'static str) -> Self {
        Payload::Single(Bytes::from_static(str.as_bytes()))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(slice: &'static [u8]) -> Self {
        Payload::Single(Bytes::from_static(slice))
    }
}

impl From<String> for Payload {
    fn from(string: String) -> Self {
        Payload::Single(Bytes::from(string))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(vec: Vec<u8>) -> Self {
        Payload::Single(Bytes::from(vec))
    }
}

impl From<Vec<Bytes>> for Payload {
    fn from(chunks: Vec<Bytes>) -> Self {
        Payload::Chunks(chunks)
    }
}

impl From<Vec<&'static str>> for Payload {
    fn from(chunks: Vec<&'static str>) -> Self {
        Payload::Chunks(chunks.into_iter().map(|s| Bytes::from_static(s.as_bytes())).collect())
    }
}

/// Coarse outcome of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 100-399
    Success,
    /// 400-599
    Failure,
}

pub fn status_class(status: StatusCode) -> StatusClass {
    if status.as_u16() >= 400 { StatusClass::Failure } else { StatusClass::Success }
}

/// Reason phrase for a status code, `None` when the code is unknown.
pub fn reason_phrase(code: u16) -> Option<&'static str> {
    match code {
        499 => Some("Client Closed Request"),
        _ => StatusCode::from_u16(code).ok().and_then(|status| status.canonical_reason()),
    }
}

/// Per-request context the server connection attaches to request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Position of the request on its connection, starting at 0
    pub sequence: u64,
    /// What the request asked for regarding persistence
    pub intent: Intent,
    pub peer_addr: Option<SocketAddr>,
}
