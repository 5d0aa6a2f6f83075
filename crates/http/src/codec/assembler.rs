//! Turns tokens into messages.
//!
//! The [`Assembler`] materializes a request or response head as soon as its
//! start line arrives, accumulates header tokens into it, and hands out the
//! message with a live [`Body`] at the end of the headers. Body tokens are
//! then written into that body, which is write-closed when the message ends.
//!
//! Lifecycle events are delivered to typed observer lists, invoked in
//! registration order.

use std::fmt;

use bytes::{Bytes, BytesMut};
use http::{Request, Response};
use tokio_util::codec::Decoder;
use tracing::{trace, warn};

use crate::codec::{Token, Tokenizer};
use crate::protocol::body::Body;
use crate::protocol::{ParseError, RequestHead, ResponseHead, response_head};

/// A message whose headers are complete; its body may still be filling.
#[derive(Debug)]
pub enum Incoming {
    Request(Request<Body>),
    Response(Response<Body>),
}

impl Incoming {
    pub fn body(&self) -> &Body {
        match self {
            Incoming::Request(request) => request.body(),
            Incoming::Response(response) => response.body(),
        }
    }

    pub fn into_request(self) -> Option<Request<Body>> {
        match self {
            Incoming::Request(request) => Some(request),
            Incoming::Response(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response<Body>> {
        match self {
            Incoming::Response(response) => Some(response),
            Incoming::Request(_) => None,
        }
    }
}

/// The last lifecycle event the assembler went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Idle,
    StartLine,
    Headers,
    HeadersComplete,
    Body,
    Complete,
    Failed,
}

#[derive(Debug)]
enum Head {
    Request(RequestHead),
    Response(ResponseHead),
}

#[derive(Default)]
struct Hooks {
    request: Vec<Box<dyn FnMut(&RequestHead) + Send>>,
    response: Vec<Box<dyn FnMut(&ResponseHead) + Send>>,
    headers_complete: Vec<Box<dyn FnMut(&Incoming) + Send>>,
    body_chunk: Vec<Box<dyn FnMut(&Bytes) + Send>>,
    complete: Vec<Box<dyn FnMut(&Body) + Send>>,
    error: Vec<Box<dyn FnMut(&ParseError) + Send>>,
}

pub struct Assembler {
    state: AssemblerState,
    head: Option<Head>,
    body: Option<Body>,
    hooks: Hooks,
}

impl Assembler {
    pub fn new() -> Self {
        Self { state: AssemblerState::Idle, head: None, body: None, hooks: Hooks::default() }
    }

    pub fn on_request(&mut self, hook: impl FnMut(&RequestHead) + Send + 'static) {
        self.hooks.request.push(Box::new(hook));
    }

    pub fn on_response(&mut self, hook: impl FnMut(&ResponseHead) + Send + 'static) {
        self.hooks.response.push(Box::new(hook));
    }

    pub fn on_headers_complete(&mut self, hook: impl FnMut(&Incoming) + Send + 'static) {
        self.hooks.headers_complete.push(Box::new(hook));
    }

    pub fn on_body_chunk(&mut self, hook: impl FnMut(&Bytes) + Send + 'static) {
        self.hooks.body_chunk.push(Box::new(hook));
    }

    pub fn on_complete(&mut self, hook: impl FnMut(&Body) + Send + 'static) {
        self.hooks.complete.push(Box::new(hook));
    }

    pub fn on_error(&mut self, hook: impl FnMut(&ParseError) + Send + 'static) {
        self.hooks.error.push(Box::new(hook));
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// The body of the message currently being received, if any.
    pub fn current_body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Forgets the message in progress after an error, aborting its body.
    pub fn reset(&mut self) {
        if let Some(body) = self.body.take() {
            body.abort();
        }
        self.head = None;
        self.state = AssemblerState::Idle;
    }

    /// Applies one token. Returns the message once its headers are complete.
    ///
    /// Errors are reported to the `on_error` hooks and always returned: they
    /// are fatal to the stream the tokens came from.
    pub fn feed(&mut self, token: Token) -> Result<Option<Incoming>, ParseError> {
        self.apply(token).map_err(|e| self.report(e))
    }

    /// Pumps `tokenizer` over `src` until a message is ready or more bytes
    /// are needed.
    pub fn drive(&mut self, tokenizer: &mut Tokenizer, src: &mut BytesMut) -> Result<Option<Incoming>, ParseError> {
        loop {
            let Some(token) = tokenizer.decode(src).map_err(|e| self.report(e))? else {
                return Ok(None);
            };
            if let Some(message) = self.feed(token)? {
                return Ok(Some(message));
            }
        }
    }

    fn report(&mut self, error: ParseError) -> ParseError {
        warn!(cause = %error, "failed to assemble message");
        self.state = AssemblerState::Failed;
        for hook in &mut self.hooks.error {
            hook(&error);
        }
        error
    }

    fn apply(&mut self, token: Token) -> Result<Option<Incoming>, ParseError> {
        match token {
            Token::RequestLine { method, target, version } => {
                self.expect_between_messages("request line")?;
                let head = RequestHead::new(&method, &target, version)?;
                trace!(%method, %target, "request started");
                for hook in &mut self.hooks.request {
                    hook(&head);
                }
                self.start(Head::Request(head));
                Ok(None)
            }

            Token::StatusLine { code, version } => {
                self.expect_between_messages("status line")?;
                let head = response_head(code, version)?;
                trace!(code, "response started");
                for hook in &mut self.hooks.response {
                    hook(&head);
                }
                self.start(Head::Response(head));
                Ok(None)
            }

            Token::Header { name, value } => {
                let headers = match &mut self.head {
                    Some(Head::Request(head)) => head.headers_mut(),
                    Some(Head::Response(head)) => head.headers_mut(),
                    None => return Err(ParseError::unexpected_token("outside of a message head", "header")),
                };
                headers.append(name, value);
                self.state = AssemblerState::Headers;
                Ok(None)
            }

            Token::HeadersComplete => {
                let (Some(head), Some(body)) = (self.head.take(), self.body.clone()) else {
                    return Err(ParseError::unexpected_token("outside of a message head", "end of headers"));
                };

                let incoming = match head {
                    Head::Request(head) => {
                        announce_length(&body, head.headers());
                        Incoming::Request(head.body(body))
                    }
                    Head::Response(head) => {
                        announce_length(&body, head.headers());
                        Incoming::Response(head.map(|()| body))
                    }
                };
                for hook in &mut self.hooks.headers_complete {
                    hook(&incoming);
                }
                self.state = AssemblerState::HeadersComplete;
                Ok(Some(incoming))
            }

            Token::BodyChunk(bytes) => {
                let body = self.receiving_body("body chunk")?;
                // tokens after the body was closed are dropped
                if !body.is_write_closed() {
                    body.write(bytes.clone());
                }
                for hook in &mut self.hooks.body_chunk {
                    hook(&bytes);
                }
                self.state = AssemblerState::Body;
                Ok(None)
            }

            Token::MessageComplete => {
                self.receiving_body("end of message")?;
                if let Some(body) = self.body.take() {
                    body.close_write();
                    for hook in &mut self.hooks.complete {
                        hook(&body);
                    }
                }
                trace!("message complete");
                self.state = AssemblerState::Complete;
                Ok(None)
            }
        }
    }

    fn expect_between_messages(&self, found: &'static str) -> Result<(), ParseError> {
        match (&self.head, &self.body) {
            (None, None) => Ok(()),
            _ => Err(ParseError::unexpected_token("inside a message", found)),
        }
    }

    fn start(&mut self, head: Head) {
        self.head = Some(head);
        self.body = Some(Body::new());
        self.state = AssemblerState::StartLine;
    }

    fn receiving_body(&self, found: &'static str) -> Result<&Body, ParseError> {
        match (&self.head, &self.body) {
            (None, Some(body)) => Ok(body),
            _ => Err(ParseError::unexpected_token("outside of a message body", found)),
        }
    }
}

fn announce_length(body: &Body, headers: &http::HeaderMap) {
    let length = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    if let Some(length) = length {
        body.set_expected_length(length);
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Assembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assembler")
            .field("state", &self.state)
            .field("head", &self.head)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}
