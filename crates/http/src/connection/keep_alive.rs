//! Connection persistence policy.
//!
//! A connection stays open only when both the request and the response
//! effectively ask for it. HTTP/1.1 defaults to keep-alive, HTTP/1.0 and
//! HTTP/0.9 need an explicit `Connection: keep-alive`. An explicit `close` on
//! either side always wins.

use http::header::CONNECTION;
use http::{HeaderMap, HeaderValue, Response, Version};

/// What one message asks for regarding persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    KeepAlive,
    Close,
}

impl Intent {
    pub fn of(version: Version, headers: &HeaderMap) -> Self {
        if let Some(explicit) = Self::explicit(headers) {
            return explicit;
        }
        if version >= Version::HTTP_11 { Intent::KeepAlive } else { Intent::Close }
    }

    /// The intent spelled out in `Connection` headers, `close` winning over
    /// `keep-alive`.
    pub fn explicit(headers: &HeaderMap) -> Option<Self> {
        let mut intent = None;
        let tokens = headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim);

        for token in tokens {
            if token.eq_ignore_ascii_case("close") {
                return Some(Intent::Close);
            }
            if token.eq_ignore_ascii_case("keep-alive") {
                intent = Some(Intent::KeepAlive);
            }
        }
        intent
    }
}

/// The decision for a request/response pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    Open,
    Close,
}

impl KeepAlive {
    pub fn is_open(self) -> bool {
        self == KeepAlive::Open
    }
}

pub fn negotiate(request: Intent, response: Intent) -> KeepAlive {
    match (request, response) {
        (Intent::KeepAlive, Intent::KeepAlive) => KeepAlive::Open,
        _ => KeepAlive::Close,
    }
}

/// Decides persistence for an outgoing response and stamps its `Connection`
/// header accordingly.
///
/// With `enabled == false` every response closes its connection.
pub fn apply_to_response<T>(request: Intent, response: &mut Response<T>, enabled: bool) -> KeepAlive {
    let decision = if enabled {
        negotiate(request, Intent::of(response.version(), response.headers()))
    } else {
        KeepAlive::Close
    };

    let value = match decision {
        KeepAlive::Open => HeaderValue::from_static("keep-alive"),
        KeepAlive::Close => HeaderValue::from_static("close"),
    };
    response.headers_mut().insert(CONNECTION, value);
    decision
}
