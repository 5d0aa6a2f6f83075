//! Core HTTP protocol types.
//!
//! This module holds the message model shared by the codec and the connection
//! layers:
//!
//! - **Messages** ([`request`], [`response`]): requests and responses are the
//!   `http` crate types carrying a [`body::Body`]; [`RequestHead`] and
//!   [`ResponseHead`] are the heads built while header tokens arrive
//! - **Payload** ([`message`]): inbound framing ([`PayloadSize`]), decoded
//!   chunks ([`PayloadItem`]) and outbound body content ([`Payload`])
//! - **Bodies** ([`body`]): the streaming [`body::Body`] with flow control
//! - **Errors** ([`error`]): [`HttpError`] at the top, with [`ParseError`],
//!   [`BuildError`], [`SendError`] and [`PipelineError`] below it

mod message;
pub use message::ConnectionInfo;
pub use message::Payload;
pub use message::PayloadItem;
pub use message::PayloadSize;
pub use message::StatusClass;
pub use message::reason_phrase;
pub use message::status_class;

mod request;
pub use request::RequestHead;
pub use request::TargetUri;
pub use request::target_of;

mod response;
pub use response::ResponseHead;
pub use response::is_failure;
pub use response::response_head;

mod error;
pub use error::BuildError;
pub use error::HttpError;
pub use error::ParseError;
pub use error::PipelineError;
pub use error::SendError;

pub mod body;
