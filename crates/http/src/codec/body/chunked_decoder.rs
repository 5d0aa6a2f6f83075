//! Decoder for `Transfer-Encoding: chunked` bodies (RFC 9112 section 7.1).
//!
//! Chunk extensions and trailer fields are read and dropped; only the chunk
//! data is handed on.

use std::task::Poll;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};

use ChunkedState::{
    Body, BodyCr, BodyLf, End, EndCr, EndLf, Extension, Size, SizeLf, SizeLws, Trailer, TrailerLf,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining: u64,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining: 0 }
    }

    /// Whether the terminating chunk and trailers were consumed.
    pub fn is_finished(&self) -> bool {
        self.state == End
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

type Step = Poll<Result<ChunkedState, ParseError>>;

macro_rules! next_byte {
    ($src:ident) => {{
        if $src.is_empty() {
            return Poll::Pending;
        }
        $src.get_u8()
    }};
}

fn invalid(reason: &'static str) -> Step {
    Poll::Ready(Err(ParseError::invalid_body(reason)))
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == End {
                trace!("chunked body finished");
                return Ok(Some(PayloadItem::Eof));
            }

            let mut data = None;
            self.state = match self.state.step(src, &mut self.remaining, &mut data) {
                Poll::Pending => return Ok(None),
                Poll::Ready(state) => state?,
            };

            if let Some(bytes) = data {
                trace!(len = bytes.len(), "decoded chunk data");
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }
        }
    }
}

impl ChunkedState {
    fn step(self, src: &mut BytesMut, remaining: &mut u64, data: &mut Option<Bytes>) -> Step {
        match self {
            Size => Self::read_size(src, remaining),
            SizeLws => match next_byte!(src) {
                b'\t' | b' ' => Poll::Ready(Ok(SizeLws)),
                b';' => Poll::Ready(Ok(Extension)),
                b'\r' => Poll::Ready(Ok(SizeLf)),
                _ => invalid("invalid whitespace after chunk size"),
            },
            // extensions are ignored up to the CRLF, a bare LF is rejected
            Extension => match next_byte!(src) {
                b'\r' => Poll::Ready(Ok(SizeLf)),
                b'\n' => invalid("chunk extension contains a bare LF"),
                _ => Poll::Ready(Ok(Extension)),
            },
            SizeLf => match next_byte!(src) {
                b'\n' if *remaining == 0 => Poll::Ready(Ok(EndCr)),
                b'\n' => Poll::Ready(Ok(Body)),
                _ => invalid("missing LF after chunk size"),
            },
            Body => Self::read_body(src, remaining, data),
            BodyCr => match next_byte!(src) {
                b'\r' => Poll::Ready(Ok(BodyLf)),
                _ => invalid("missing CR after chunk data"),
            },
            BodyLf => match next_byte!(src) {
                b'\n' => Poll::Ready(Ok(Size)),
                _ => invalid("missing LF after chunk data"),
            },
            Trailer => match next_byte!(src) {
                b'\r' => Poll::Ready(Ok(TrailerLf)),
                _ => Poll::Ready(Ok(Trailer)),
            },
            TrailerLf => match next_byte!(src) {
                b'\n' => Poll::Ready(Ok(EndCr)),
                _ => invalid("missing LF after trailer field"),
            },
            EndCr => match next_byte!(src) {
                b'\r' => Poll::Ready(Ok(EndLf)),
                _ => Poll::Ready(Ok(Trailer)),
            },
            EndLf => match next_byte!(src) {
                b'\n' => Poll::Ready(Ok(End)),
                _ => invalid("missing final LF of chunked body"),
            },
            End => Poll::Ready(Ok(End)),
        }
    }

    fn read_size(src: &mut BytesMut, size: &mut u64) -> Step {
        let digit = match next_byte!(src) {
            b @ b'0'..=b'9' => b - b'0',
            b @ b'a'..=b'f' => b - b'a' + 10,
            b @ b'A'..=b'F' => b - b'A' + 10,
            b'\t' | b' ' => return Poll::Ready(Ok(SizeLws)),
            b';' => return Poll::Ready(Ok(Extension)),
            b'\r' => return Poll::Ready(Ok(SizeLf)),
            _ => return invalid("invalid chunk size"),
        };

        match size.checked_mul(16).and_then(|size| size.checked_add(u64::from(digit))) {
            Some(next) => {
                *size = next;
                Poll::Ready(Ok(Size))
            }
            None => invalid("chunk size overflows"),
        }
    }

    fn read_body(src: &mut BytesMut, remaining: &mut u64, data: &mut Option<Bytes>) -> Step {
        if src.is_empty() {
            return Poll::Pending;
        }

        let len = usize::try_from(*remaining).unwrap_or(usize::MAX).min(src.len());
        *remaining -= len as u64;
        *data = Some(src.split_to(len).freeze());

        if *remaining > 0 { Poll::Ready(Ok(Body)) } else { Poll::Ready(Ok(BodyCr)) }
    }
}
