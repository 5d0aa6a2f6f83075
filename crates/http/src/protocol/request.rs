//! HTTP request head handling.
//!
//! Wraps `http::Request<()>` so the assembler can build the head while header
//! tokens are still arriving, and attach the body once they are complete.

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

use crate::protocol::ParseError;

/// The request target exactly as it appeared on the request line.
///
/// Stored in the request extensions; the core never interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUri(pub String);

/// Represents an HTTP request head.
///
/// This struct wraps a `http::Request<()>` to provide:
/// - Construction from start-line tokens
/// - Incremental header accumulation
/// - Body attachment
#[derive(Debug)]
pub struct RequestHead {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHead {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHead {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHead {
    /// Builds a head from the request-line parts.
    ///
    /// The verb is uppercased, the target is kept verbatim in a [`TargetUri`]
    /// extension next to the parsed `Uri`.
    pub fn new(verb: &str, target: &str, version: Version) -> Result<Self, ParseError> {
        let method = Method::from_bytes(verb.to_ascii_uppercase().as_bytes()).map_err(|_| ParseError::InvalidMethod)?;
        let uri = target.parse::<Uri>().map_err(|_| ParseError::InvalidUri)?;

        let mut inner = Request::new(());
        *inner.method_mut() = method;
        *inner.uri_mut() = uri;
        *inner.version_mut() = version;
        inner.extensions_mut().insert(TargetUri(target.to_string()));
        Ok(Self { inner })
    }

    /// Consumes the head and returns the inner `Request<()>`.
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body to this head, converting it into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|()| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    /// The request target as sent, falling back to the rendered `Uri`.
    pub fn target(&self) -> String {
        target_of(&self.inner)
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }
}

/// The request target of any request, preferring the verbatim [`TargetUri`].
pub fn target_of<T>(request: &Request<T>) -> String {
    match request.extensions().get::<TargetUri>() {
        Some(TargetUri(target)) => target.clone(),
        None => request.uri().to_string(),
    }
}

impl From<Parts> for RequestHead {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHead {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}
