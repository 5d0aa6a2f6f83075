//! Byte tokenizer for HTTP/1.x messages.
//!
//! The tokenizer turns raw bytes into the token sequence the
//! [`Assembler`](crate::codec::Assembler) consumes:
//!
//! ```text
//! RequestLine | StatusLine, Header*, HeadersComplete, BodyChunk*, MessageComplete
//! ```
//!
//! Message heads are parsed with `httparse` in one go once the blank line has
//! arrived; header values are sliced out of the received bytes without copying.
//! Bodies are delimited by the [`PayloadDecoder`] matching the head's framing.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum head size: 8KB

use std::collections::VecDeque;
use std::mem::MaybeUninit;

use bytes::{Bytes, BytesMut};
use http::{HeaderName, HeaderValue, Method, Version};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::body::PayloadDecoder;
use crate::ensure;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// Maximum number of headers allowed in a message head
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the whole message head
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// One parse event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    RequestLine { method: String, target: String, version: Version },
    StatusLine { code: u16, version: Version },
    Header { name: HeaderName, value: HeaderValue },
    HeadersComplete,
    BodyChunk(Bytes),
    MessageComplete,
}

impl Token {
    /// Short name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Token::RequestLine { .. } => "request line",
            Token::StatusLine { .. } => "status line",
            Token::Header { .. } => "header",
            Token::HeadersComplete => "end of headers",
            Token::BodyChunk(_) => "body chunk",
            Token::MessageComplete => "end of message",
        }
    }

    pub fn is_message_complete(&self) -> bool {
        matches!(self, Token::MessageComplete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Requests,
    Responses,
}

/// A [`Decoder`] producing [`Token`]s for one direction of a connection.
#[derive(Debug)]
pub struct Tokenizer {
    kind: Kind,
    pending: VecDeque<Token>,
    payload: Option<PayloadDecoder>,
    expectations: VecDeque<Method>,
}

impl Tokenizer {
    /// Tokenizes the requests a server receives.
    pub fn requests() -> Self {
        Self::new(Kind::Requests)
    }

    /// Tokenizes the responses a client receives.
    pub fn responses() -> Self {
        Self::new(Kind::Responses)
    }

    fn new(kind: Kind) -> Self {
        Self { kind, pending: VecDeque::new(), payload: None, expectations: VecDeque::new() }
    }

    /// Registers the method of a request that was sent, so the matching
    /// response can be framed. Responses to `HEAD` never carry a body.
    pub fn expect_response(&mut self, method: &Method) {
        self.expectations.push_back(method.clone());
    }

    /// True between messages: nothing buffered, no body in progress.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.payload.is_none()
    }

    /// Drops the message in progress, keeping the registered expectations.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.payload = None;
    }

    fn decode_head(&mut self, src: &mut BytesMut) -> Result<Option<Token>, ParseError> {
        let mut indices = [HeaderIndex::EMPTY; MAX_HEADER_NUM];
        let parsed = match self.kind {
            Kind::Requests => parse_request(src, &mut indices)?,
            Kind::Responses => parse_response(src, &mut indices)?,
        };
        let Some(ParsedHead { start, header_count, head_len }) = parsed else {
            return Ok(None);
        };

        trace!(head_len, header_count, "parsed message head");
        let head = src.split_to(head_len).freeze();
        let mut framing = Framing::default();
        let mut tokens = VecDeque::with_capacity(header_count + 2);

        for index in &indices[..header_count] {
            let name = HeaderName::from_bytes(&head[index.name.0..index.name.1]).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_maybe_shared(head.slice(index.value.0..index.value.1))
                .map_err(ParseError::invalid_header)?;
            framing.observe(&name, &value)?;
            tokens.push_back(Token::Header { name, value });
        }
        tokens.push_back(Token::HeadersComplete);
        let framing = framing.checked()?;

        let size = match &start {
            Token::StatusLine { code, .. } => self.response_payload(*code, framing),
            _ => framing.request_payload(),
        };
        trace!(?size, "selected body framing");
        self.payload = Some(PayloadDecoder::from(size));
        self.pending = tokens;
        Ok(Some(start))
    }

    fn response_payload(&mut self, code: u16, framing: Framing) -> PayloadSize {
        // interim responses precede the final one to the same request
        if (100..200).contains(&code) {
            return PayloadSize::Empty;
        }
        let method = self.expectations.pop_front();
        if code == 204 || code == 304 || method == Some(Method::HEAD) {
            return PayloadSize::Empty;
        }
        framing.response_payload()
    }

    fn decode_body(&mut self, item: Option<PayloadItem>) -> Option<Token> {
        match item? {
            PayloadItem::Chunk(bytes) => Some(Token::BodyChunk(bytes)),
            PayloadItem::Eof => {
                self.payload = None;
                Some(Token::MessageComplete)
            }
        }
    }
}

impl Decoder for Tokenizer {
    type Item = Token;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(token) = self.pending.pop_front() {
            return Ok(Some(token));
        }

        loop {
            if let Some(payload) = &mut self.payload {
                let item = payload.decode(src)?;
                return match self.decode_body(item) {
                    Some(Token::BodyChunk(bytes)) if bytes.is_empty() => continue,
                    token => Ok(token),
                };
            }

            if src.is_empty() {
                return Ok(None);
            }
            return self.decode_head(src);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(token) = self.decode(src)? {
            return Ok(Some(token));
        }

        if let Some(payload) = &mut self.payload {
            let item = payload.decode_eof(src)?;
            return Ok(self.decode_body(item));
        }

        ensure!(src.is_empty(), ParseError::invalid_header("connection closed inside a message head"));
        Ok(None)
    }
}

struct ParsedHead {
    start: Token,
    header_count: usize,
    head_len: usize,
}

fn parse_request(src: &BytesMut, indices: &mut [HeaderIndex]) -> Result<Option<ParsedHead>, ParseError> {
    let mut req = httparse::Request::new(&mut []);
    let mut headers = [MaybeUninit::<httparse::Header<'_>>::uninit(); MAX_HEADER_NUM];

    match req.parse_with_uninit_headers(src, &mut headers).map_err(httparse_error)? {
        Status::Complete(head_len) => {
            ensure!(head_len <= MAX_HEADER_BYTES, ParseError::too_large_header(head_len, MAX_HEADER_BYTES));
            HeaderIndex::record(src, req.headers, indices);

            let start = Token::RequestLine {
                method: req.method.ok_or(ParseError::InvalidMethod)?.to_string(),
                target: req.path.ok_or(ParseError::InvalidUri)?.to_string(),
                version: version_of(req.version)?,
            };
            Ok(Some(ParsedHead { start, header_count: req.headers.len(), head_len }))
        }
        Status::Partial => {
            ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
            Ok(None)
        }
    }
}

fn parse_response(src: &BytesMut, indices: &mut [HeaderIndex]) -> Result<Option<ParsedHead>, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    let mut res = httparse::Response::new(&mut headers);

    match res.parse(src).map_err(httparse_error)? {
        Status::Complete(head_len) => {
            ensure!(head_len <= MAX_HEADER_BYTES, ParseError::too_large_header(head_len, MAX_HEADER_BYTES));
            HeaderIndex::record(src, res.headers, indices);

            let start = Token::StatusLine {
                code: res.code.ok_or(ParseError::InvalidStatus(0))?,
                version: version_of(res.version)?,
            };
            Ok(Some(ParsedHead { start, header_count: res.headers.len(), head_len }))
        }
        Status::Partial => {
            ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
            Ok(None)
        }
    }
}

fn httparse_error(e: httparse::Error) -> ParseError {
    match e {
        httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
        httparse::Error::Version => ParseError::InvalidVersion(None),
        httparse::Error::Status => ParseError::InvalidStatus(0),
        e => ParseError::invalid_header(e),
    }
}

fn version_of(minor: Option<u8>) -> Result<Version, ParseError> {
    match minor {
        Some(0) => Ok(Version::HTTP_10),
        Some(1) => Ok(Version::HTTP_11),
        other => Err(ParseError::InvalidVersion(other)),
    }
}

/// Byte ranges of one header's name and value inside the parsed head.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

impl HeaderIndex {
    const EMPTY: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let base = bytes.as_ptr() as usize;
        for (header, index) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - base;
            index.name = (name_start, name_start + header.name.len());
            let value_start = header.value.as_ptr() as usize - base;
            index.value = (value_start, value_start + header.value.len());
        }
    }
}

/// The framing headers seen in a head.
#[derive(Debug, Default, Clone, Copy)]
struct Framing {
    chunked: bool,
    transfer_encoding: bool,
    content_length: Option<u64>,
}

impl Framing {
    fn observe(&mut self, name: &HeaderName, value: &HeaderValue) -> Result<(), ParseError> {
        if name == http::header::TRANSFER_ENCODING {
            self.transfer_encoding = true;
            // chunked has to be the final coding
            self.chunked = value
                .as_bytes()
                .rsplit(|b| *b == b',')
                .next()
                .is_some_and(|coding| coding.trim_ascii().eq_ignore_ascii_case(b"chunked"));
        } else if name == http::header::CONTENT_LENGTH {
            let length = value
                .to_str()
                .ok()
                .and_then(|value| value.trim().parse::<u64>().ok())
                .ok_or_else(|| ParseError::invalid_content_length(format!("value {value:?} is not u64")))?;
            ensure!(
                self.content_length.is_none_or(|seen| seen == length),
                ParseError::invalid_content_length("conflicting content-length values")
            );
            self.content_length = Some(length);
        }
        Ok(())
    }

    fn checked(self) -> Result<Self, ParseError> {
        ensure!(
            !(self.transfer_encoding && self.content_length.is_some()),
            ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")
        );
        Ok(self)
    }

    fn request_payload(self) -> PayloadSize {
        match (self.chunked, self.content_length) {
            (true, _) => PayloadSize::new_chunked(),
            (false, Some(length)) => PayloadSize::new_length(length),
            (false, None) => PayloadSize::new_empty(),
        }
    }

    fn response_payload(self) -> PayloadSize {
        match (self.chunked, self.content_length) {
            (true, _) => PayloadSize::new_chunked(),
            (false, Some(length)) => PayloadSize::new_length(length),
            (false, None) => PayloadSize::UntilClose,
        }
    }
}
