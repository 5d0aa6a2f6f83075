//! Body decoders for inbound messages.
//!
//! - [`ChunkedDecoder`]: `Transfer-Encoding: chunked`
//! - `LengthDecoder`: `Content-Length`, and the close-delimited variant used
//!   for responses without either header
//! - [`PayloadDecoder`]: selects one of the above from a
//!   [`PayloadSize`](crate::protocol::PayloadSize)
//!
//! Outbound framing is written by the [`Builder`](crate::codec::Builder).

mod chunked_decoder;
mod length_decoder;
mod payload_decoder;

pub use chunked_decoder::ChunkedDecoder;
pub use payload_decoder::PayloadDecoder;
