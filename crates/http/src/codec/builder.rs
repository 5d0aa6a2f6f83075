//! Outbound message serialization.
//!
//! The [`Builder`] is a state machine driven by an ordered sequence of calls:
//!
//! ```text
//! Ready -> WritingHeaders -> WritingBody -> WritingTrailers -> (complete) -> Ready
//! ```
//!
//! It decides the body framing on the fly. An explicit `Content-Length`
//! header selects identity framing, an explicit `Transfer-Encoding` header
//! selects chunked framing, and a body started without either gets a
//! synthesized `Transfer-Encoding: chunked`. One builder serializes every
//! outgoing message of one connection direction, one after the other.
//!
//! Every write is appended to an output accumulator (drained with
//! [`take_output`](Builder::take_output)) and announced to the `on_write`
//! hooks, once per write and in call order.

use std::fmt;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, Version};
use tracing::trace;

use crate::protocol::{BuildError, Payload, reason_phrase};

type WriteHook = Box<dyn FnMut(&Bytes) + Send>;
type CompleteHook = Box<dyn FnMut(usize) + Send>;
type ErrorHook = Box<dyn FnMut(&BuildError) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Ready,
    WritingHeaders,
    WritingBody,
    WritingTrailers,
}

impl fmt::Display for BuilderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuilderState::Ready => "ready",
            BuilderState::WritingHeaders => "writing headers",
            BuilderState::WritingBody => "writing body",
            BuilderState::WritingTrailers => "writing trailers",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Unknown,
    Chunked,
    Identity,
}

pub struct Builder {
    state: BuilderState,
    framing: Framing,
    suppress_body: bool,
    bodiless_status: bool,
    written: usize,
    output: BytesMut,
    on_write: Vec<WriteHook>,
    on_complete: Vec<CompleteHook>,
    on_error: Vec<ErrorHook>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            state: BuilderState::Ready,
            framing: Framing::Unknown,
            suppress_body: false,
            bodiless_status: false,
            written: 0,
            output: BytesMut::new(),
            on_write: Vec::new(),
            on_complete: Vec::new(),
            on_error: Vec::new(),
        }
    }

    /// Called with every chunk of bytes the builder produces.
    pub fn on_write(&mut self, hook: impl FnMut(&Bytes) + Send + 'static) {
        self.on_write.push(Box::new(hook));
    }

    /// Called with the total bytes of a message once it is complete.
    pub fn on_complete(&mut self, hook: impl FnMut(usize) + Send + 'static) {
        self.on_complete.push(Box::new(hook));
    }

    /// Once an error hook is registered, misuse is reported to the hooks and
    /// the failing call returns `Ok(())` without writing anything.
    pub fn on_error(&mut self, hook: impl FnMut(&BuildError) + Send + 'static) {
        self.on_error.push(Box::new(hook));
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    /// The framing decision for the current message: `None` while undecided.
    pub fn is_chunked(&self) -> Option<bool> {
        match self.framing {
            Framing::Unknown => None,
            Framing::Chunked => Some(true),
            Framing::Identity => Some(false),
        }
    }

    /// Bytes written for the current message so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Drains the bytes produced since the last call.
    pub fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    /// Writes the current message without any body bytes: framing headers
    /// pass through, chunks are dropped and no terminator is emitted.
    ///
    /// Used for responses to `HEAD`; 1xx, 204 and 304 responses get this
    /// automatically.
    pub fn suppress_body(&mut self) {
        self.suppress_body = true;
    }

    /// Drops the message in progress and any undrained output.
    pub fn reset(&mut self) {
        self.state = BuilderState::Ready;
        self.framing = Framing::Unknown;
        self.suppress_body = false;
        self.bodiless_status = false;
        self.written = 0;
        self.output.clear();
    }

    pub fn request_line(&mut self, method: &Method, target: &str, version: Version) -> Result<(), BuildError> {
        self.complete()?;
        let version = match version_str(version) {
            Ok(version) => version,
            Err(e) => return self.fail(e),
        };

        self.write(format!("{method} {target} {version}\r\n"));
        self.state = BuilderState::WritingHeaders;
        Ok(())
    }

    pub fn response_line(&mut self, code: u16, version: Version) -> Result<(), BuildError> {
        self.complete()?;
        let version = match version_str(version) {
            Ok(version) => version,
            Err(e) => return self.fail(e),
        };
        let Some(reason) = reason_phrase(code) else {
            return self.fail(BuildError::UnknownStatus(code));
        };

        if (100..200).contains(&code) || code == 204 || code == 304 {
            self.suppress_body = true;
            self.bodiless_status = true;
        }
        self.write(format!("{version} {code} {reason}\r\n"));
        self.state = BuilderState::WritingHeaders;
        Ok(())
    }

    /// Writes `name: value`, optionally followed by `; charset=<charset>`.
    pub fn header(&mut self, name: &str, value: &str, charset: Option<&str>) -> Result<(), BuildError> {
        match charset {
            Some(charset) => self.field(name.as_bytes(), format!("{value}; charset={charset}").as_bytes()),
            None => self.field(name.as_bytes(), value.as_bytes()),
        }
    }

    /// Writes every header of the map, duplicates included, in map order.
    pub fn headers(&mut self, headers: &HeaderMap) -> Result<(), BuildError> {
        for (name, value) in headers {
            self.field(name.as_str().as_bytes(), value.as_bytes())?;
        }
        Ok(())
    }

    /// Writes one preformatted `name: value` line.
    pub fn raw_header(&mut self, line: &str) -> Result<(), BuildError> {
        let (name, value) = line.split_once(':').unwrap_or((line, ""));
        self.field(name.trim().as_bytes(), value.trim_start().as_bytes())
    }

    fn field(&mut self, name: &[u8], value: &[u8]) -> Result<(), BuildError> {
        match self.state {
            BuilderState::Ready => return self.fail(BuildError::out_of_order("header", self.state)),
            BuilderState::WritingBody if self.framing == Framing::Chunked => {
                if !self.suppress_body {
                    self.write(Bytes::from_static(b"0\r\n"));
                }
                self.state = BuilderState::WritingTrailers;
            }
            BuilderState::WritingBody => return self.fail(BuildError::TrailersRequireChunked),
            BuilderState::WritingHeaders | BuilderState::WritingTrailers => {}
        }

        if self.state == BuilderState::WritingHeaders {
            if name.eq_ignore_ascii_case(b"content-length") {
                self.framing = Framing::Identity;
            } else if name.eq_ignore_ascii_case(b"transfer-encoding") && self.framing == Framing::Unknown {
                self.framing = Framing::Chunked;
            }
        } else if self.suppress_body {
            return Ok(());
        }

        let mut line = BytesMut::with_capacity(name.len() + value.len() + 4);
        line.extend_from_slice(name);
        line.extend_from_slice(b": ");
        line.extend_from_slice(value);
        line.extend_from_slice(b"\r\n");
        self.write(line.freeze());
        Ok(())
    }

    /// Writes one chunk or every chunk of a sequence.
    pub fn body(&mut self, payload: impl Into<Payload>) -> Result<(), BuildError> {
        for chunk in payload.into().into_chunks() {
            self.body_chunk(chunk)?;
        }
        Ok(())
    }

    /// Writes one body chunk, ending the headers first if needed.
    ///
    /// Empty chunks write nothing; the chunked terminator is only emitted
    /// by [`complete`](Builder::complete).
    pub fn body_chunk(&mut self, chunk: impl Into<Bytes>) -> Result<(), BuildError> {
        match self.state {
            BuilderState::Ready => return self.fail(BuildError::out_of_order("body_chunk", self.state)),
            BuilderState::WritingTrailers => return self.fail(BuildError::BodyAfterTrailers),
            BuilderState::WritingHeaders => self.end_headers(),
            BuilderState::WritingBody => {}
        }

        let chunk = chunk.into();
        if chunk.is_empty() || self.suppress_body {
            return Ok(());
        }

        if self.framing == Framing::Chunked {
            self.write(format!("{:x}\r\n", chunk.len()));
            self.write(chunk);
            self.write(Bytes::from_static(b"\r\n"));
        } else {
            self.write(chunk);
        }
        Ok(())
    }

    fn end_headers(&mut self) {
        if self.framing == Framing::Unknown {
            // 1xx, 204 and 304 must not announce any framing
            if self.bodiless_status {
                self.framing = Framing::Identity;
            } else {
                self.framing = Framing::Chunked;
                self.write(Bytes::from_static(b"Transfer-Encoding: chunked\r\n"));
            }
        }
        self.write(Bytes::from_static(b"\r\n"));
        self.state = BuilderState::WritingBody;
    }

    /// Finishes the current message and returns to `Ready`.
    ///
    /// A message that never started a body gets `Content-Length: 0`, unless
    /// its body is suppressed. Does nothing when no message is in progress.
    pub fn complete(&mut self) -> Result<(), BuildError> {
        match self.state {
            BuilderState::Ready => return Ok(()),
            BuilderState::WritingHeaders => {
                if self.framing == Framing::Unknown {
                    if !self.suppress_body {
                        self.write(Bytes::from_static(b"Content-Length: 0\r\n"));
                    }
                    self.framing = Framing::Identity;
                }
                self.end_headers();
            }
            BuilderState::WritingBody | BuilderState::WritingTrailers => {}
        }

        if self.framing == Framing::Chunked && !self.suppress_body {
            if self.state == BuilderState::WritingTrailers {
                self.write(Bytes::from_static(b"\r\n"));
            } else {
                self.write(Bytes::from_static(b"0\r\n\r\n"));
            }
        }

        let written = self.written;
        trace!(written, "message complete");
        for hook in &mut self.on_complete {
            hook(written);
        }

        self.state = BuilderState::Ready;
        self.framing = Framing::Unknown;
        self.suppress_body = false;
        self.bodiless_status = false;
        self.written = 0;
        Ok(())
    }

    fn write(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        self.written += bytes.len();
        self.output.extend_from_slice(&bytes);
        for hook in &mut self.on_write {
            hook(&bytes);
        }
    }

    fn fail(&mut self, error: BuildError) -> Result<(), BuildError> {
        if self.on_error.is_empty() {
            return Err(error);
        }
        trace!(%error, "reporting build error to hooks");
        for hook in &mut self.on_error {
            hook(&error);
        }
        Ok(())
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("state", &self.state)
            .field("framing", &self.framing)
            .field("suppress_body", &self.suppress_body)
            .field("bodiless_status", &self.bodiless_status)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

fn version_str(version: Version) -> Result<&'static str, BuildError> {
    match version {
        Version::HTTP_09 => Ok("HTTP/0.9"),
        Version::HTTP_10 => Ok("HTTP/1.0"),
        Version::HTTP_11 => Ok("HTTP/1.1"),
        other => Err(BuildError::UnsupportedVersion(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use http::HeaderValue;

    use super::*;

    fn output(builder: &mut Builder) -> String {
        String::from_utf8(builder.take_output().to_vec()).unwrap()
    }

    #[test]
    fn chunked_by_default() {
        let mut builder = Builder::new();
        builder.response_line(200, Version::HTTP_11).unwrap();
        builder.body_chunk("abc").unwrap();
        builder.body_chunk("defgh").unwrap();
        builder.complete().unwrap();

        assert_eq!(
            output(&mut builder),
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n5\r\ndefgh\r\n0\r\n\r\n"
        );
        assert_eq!(builder.state(), BuilderState::Ready);
    }

    #[test]
    fn identity_with_content_length() {
        let mut builder = Builder::new();
        builder.response_line(200, Version::HTTP_11).unwrap();
        builder.header("Content-Length", "8", None).unwrap();
        builder.body_chunk("abc").unwrap();
        builder.body_chunk("defgh").unwrap();
        builder.complete().unwrap();

        assert_eq!(output(&mut builder), "HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\nabcdefgh");
    }

    #[test]
    fn explicit_transfer_encoding_is_not_repeated() {
        let mut builder = Builder::new();
        builder.response_line(200, Version::HTTP_11).unwrap();
        builder.header("Transfer-Encoding", "chunked", None).unwrap();
        assert_eq!(builder.is_chunked(), Some(true));
        builder.body_chunk("abc").unwrap();
        builder.complete().unwrap();

        assert_eq!(output(&mut builder), "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n");
    }

    #[test]
    fn content_length_after_transfer_encoding_selects_identity() {
        let mut builder = Builder::new();
        builder.request_line(&Method::PUT, "/file", Version::HTTP_11).unwrap();
        builder.header("Transfer-Encoding", "chunked", None).unwrap();
        builder.header("Content-Length", "5", None).unwrap();
        assert_eq!(builder.is_chunked(), Some(false));
        builder.body_chunk("hello").unwrap();
        builder.complete().unwrap();

        assert_eq!(
            output(&mut builder),
            "PUT /file HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 5\r\n\r\nhello"
        );
    }

    #[test]
    fn bodiless_status_announces_no_framing() {
        let mut builder = Builder::new();
        builder.response_line(204, Version::HTTP_11).unwrap();
        builder.header("X-Request-Id", "7", None).unwrap();
        builder.body_chunk("ignored").unwrap();
        builder.complete().unwrap();
        assert_eq!(output(&mut builder), "HTTP/1.1 204 No Content\r\nX-Request-Id: 7\r\n\r\n");

        builder.response_line(100, Version::HTTP_11).unwrap();
        builder.body_chunk("ignored").unwrap();
        builder.complete().unwrap();
        assert_eq!(output(&mut builder), "HTTP/1.1 100 Continue\r\n\r\n");

        builder.response_line(200, Version::HTTP_11).unwrap();
        builder.body_chunk("ok").unwrap();
        builder.complete().unwrap();
        assert_eq!(output(&mut builder), "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\n\r\n");
    }

    #[test]
    fn unknown_status_writes_nothing() {
        let mut builder = Builder::new();
        assert_eq!(builder.response_line(999, Version::HTTP_11), Err(BuildError::UnknownStatus(999)));
        assert!(builder.take_output().is_empty());
        assert_eq!(builder.state(), BuilderState::Ready);
    }

    #[test]
    fn errors_go_to_hooks_when_registered() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let mut builder = Builder::new();
        {
            let errors = errors.clone();
            builder.on_error(move |e| errors.lock().unwrap().push(e.clone()));
        }

        assert_eq!(builder.response_line(999, Version::HTTP_11), Ok(()));
        assert_eq!(builder.raw_header("Host: example.com"), Ok(()));
        assert_eq!(builder.body_chunk("x"), Ok(()));
        assert!(builder.take_output().is_empty());

        assert_eq!(
            *errors.lock().unwrap(),
            vec![
                BuildError::UnknownStatus(999),
                BuildError::out_of_order("header", BuilderState::Ready),
                BuildError::out_of_order("body_chunk", BuilderState::Ready),
            ]
        );
    }

    #[test]
    fn request_without_body_gets_zero_length() {
        let mut builder = Builder::new();
        builder.request_line(&Method::GET, "/index.html", Version::HTTP_11).unwrap();
        builder.header("Host", "example.com", None).unwrap();
        builder.complete().unwrap();

        assert_eq!(output(&mut builder), "GET /index.html HTTP/1.1\r\nHost: example.com\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn trailers_after_chunked_body() {
        let mut builder = Builder::new();
        builder.response_line(200, Version::HTTP_11).unwrap();
        builder.body(vec!["ab", "", "c"]).unwrap();
        builder.raw_header("Expires: never").unwrap();
        assert_eq!(builder.state(), BuilderState::WritingTrailers);
        assert_eq!(builder.body_chunk("late"), Err(BuildError::BodyAfterTrailers));
        builder.complete().unwrap();

        assert_eq!(
            output(&mut builder),
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nab\r\n1\r\nc\r\n0\r\nExpires: never\r\n\r\n"
        );
    }

    #[test]
    fn trailers_require_chunked() {
        let mut builder = Builder::new();
        builder.response_line(200, Version::HTTP_11).unwrap();
        builder.header("Content-Length", "1", None).unwrap();
        builder.body_chunk("a").unwrap();
        assert_eq!(builder.raw_header("Expires: never"), Err(BuildError::TrailersRequireChunked));
    }

    #[test]
    fn new_message_completes_previous() {
        let completed = Arc::new(Mutex::new(Vec::new()));
        let mut builder = Builder::new();
        {
            let completed = completed.clone();
            builder.on_complete(move |written| completed.lock().unwrap().push(written));
        }

        builder.response_line(200, Version::HTTP_10).unwrap();
        builder.body_chunk("a").unwrap();
        builder.response_line(404, Version::HTTP_11).unwrap();
        builder.complete().unwrap();

        let first = "HTTP/1.0 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n1\r\na\r\n0\r\n\r\n";
        let second = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(output(&mut builder), format!("{first}{second}"));
        assert_eq!(*completed.lock().unwrap(), vec![first.len(), second.len()]);
    }

    #[test]
    fn write_hook_sees_every_write_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut builder = Builder::new();
        {
            let seen = seen.clone();
            builder.on_write(move |bytes| seen.lock().unwrap().push(bytes.clone()));
        }

        builder.response_line(200, Version::HTTP_11).unwrap();
        builder.header("Content-Length", "2", None).unwrap();
        builder.body_chunk("ok").unwrap();
        builder.complete().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.concat(), builder.take_output().to_vec());
    }

    #[test]
    fn suppressed_body_keeps_framing_headers() {
        let mut builder = Builder::new();
        builder.response_line(200, Version::HTTP_11).unwrap();
        builder.suppress_body();
        builder.header("Content-Type", "text/plain", Some("utf-8")).unwrap();
        builder.body_chunk("hidden").unwrap();
        builder.complete().unwrap();

        assert_eq!(
            output(&mut builder),
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nTransfer-Encoding: chunked\r\n\r\n"
        );

        builder.response_line(204, Version::HTTP_11).unwrap();
        builder.complete().unwrap();
        assert_eq!(output(&mut builder), "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn header_map_keeps_duplicates() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let mut builder = Builder::new();
        builder.response_line(200, Version::HTTP_11).unwrap();
        builder.headers(&headers).unwrap();
        builder.complete().unwrap();

        assert_eq!(
            output(&mut builder),
            "HTTP/1.1 200 OK\r\nset-cookie: a=1\r\nset-cookie: b=2\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn unsupported_version_and_reset() {
        let mut builder = Builder::new();
        assert_eq!(
            builder.request_line(&Method::GET, "/", Version::HTTP_2),
            Err(BuildError::UnsupportedVersion(Version::HTTP_2))
        );

        builder.request_line(&Method::POST, "/", Version::HTTP_11).unwrap();
        builder.body_chunk("partial").unwrap();
        builder.reset();
        assert_eq!(builder.state(), BuilderState::Ready);
        assert_eq!(builder.is_chunked(), None);
        assert!(builder.take_output().is_empty());
    }
}
