use futures::StreamExt;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Request, Response, StatusCode, Version};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::codec::Builder;
use crate::protocol::body::Body;
use crate::protocol::{HttpError, SendError, target_of};

/// Serializes whole messages through a [`Builder`] onto a transport.
#[derive(Debug)]
pub struct MessageWriter<W> {
    writer: W,
    builder: Builder,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self { writer, builder: Builder::new() }
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub async fn write_continue(&mut self, version: Version) -> Result<(), HttpError> {
        self.builder.response_line(StatusCode::CONTINUE.as_u16(), version)?;
        self.builder.complete()?;
        self.flush().await
    }

    /// Writes `response`, leaving out its body bytes when `suppress_body`
    /// (a response to `HEAD`).
    pub async fn write_response(&mut self, response: &Response<Body>, suppress_body: bool) -> Result<(), HttpError> {
        let status = response.status();
        self.builder.response_line(status.as_u16(), response.version())?;
        if suppress_body {
            self.builder.suppress_body();
        }
        let bodiless = status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED;
        self.write_message(response.headers(), response.body(), !bodiless).await
    }

    pub async fn write_request(&mut self, request: &Request<Body>) -> Result<(), HttpError> {
        self.builder.request_line(request.method(), &target_of(request), request.version())?;
        self.write_message(request.headers(), request.body(), true).await
    }

    async fn write_message(&mut self, headers: &HeaderMap, body: &Body, announce_length: bool) -> Result<(), HttpError> {
        self.builder.headers(headers)?;

        let framed = headers.contains_key(CONTENT_LENGTH) || headers.contains_key(TRANSFER_ENCODING);
        if body.is_write_closed() {
            // a complete body goes out with identity framing
            let length = body.buffered_len();
            if announce_length && !framed && length > 0 {
                self.builder.header("Content-Length", &length.to_string(), None)?;
            }
        } else {
            self.flush().await?;
        }

        let mut chunks = body.subscribe();
        while let Some(chunk) = chunks.next().await {
            self.builder.body_chunk(chunk)?;
            self.flush().await?;
        }

        if body.is_aborted() {
            self.builder.reset();
            return Err(SendError::invalid_body("body aborted before it was complete").into());
        }

        self.builder.complete()?;
        self.flush().await
    }

    async fn flush(&mut self) -> Result<(), HttpError> {
        let output = self.builder.take_output();
        if output.is_empty() {
            return Ok(());
        }

        trace!(len = output.len(), "writing to transport");
        self.writer.write_all(&output).await.map_err(SendError::io)?;
        self.writer.flush().await.map_err(SendError::io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::Method;
    use http::header::CONNECTION;
    use indoc::indoc;

    use super::*;

    fn crlf(raw: &str) -> String {
        raw.replace('\n', "\r\n")
    }

    #[tokio::test]
    async fn complete_body_gets_content_length() {
        let mut writer = MessageWriter::new(Vec::new());
        let response = Response::builder().header(CONNECTION, "keep-alive").body(Body::full("hello")).unwrap();
        writer.write_response(&response, false).await.unwrap();

        let expected = indoc! {"
            HTTP/1.1 200 OK
            connection: keep-alive
            Content-Length: 5

            hello"};
        assert_eq!(String::from_utf8(writer.get_mut().clone()).unwrap(), crlf(expected));
    }

    #[tokio::test]
    async fn open_body_is_chunked() {
        let body = Body::new();
        body.write("abc");
        let request = Request::builder().method(Method::POST).uri("/up").body(body.clone()).unwrap();

        let feeder = tokio::spawn(async move {
            tokio::task::yield_now().await;
            body.write("defg");
            body.close_write();
        });

        let mut writer = MessageWriter::new(Vec::new());
        writer.write_request(&request).await.unwrap();
        feeder.await.unwrap();

        let expected = indoc! {"
            POST /up HTTP/1.1
            Transfer-Encoding: chunked

            3
            abc
            4
            defg
            0

        "};
        assert_eq!(String::from_utf8(writer.get_mut().clone()).unwrap(), crlf(expected));
    }

    #[tokio::test]
    async fn head_response_keeps_framing_but_drops_body() {
        let mut writer = MessageWriter::new(Vec::new());
        let response = Response::new(Body::full("hidden"));
        writer.write_response(&response, true).await.unwrap();

        let expected = indoc! {"
            HTTP/1.1 200 OK
            Content-Length: 6

        "};
        assert_eq!(String::from_utf8(writer.get_mut().clone()).unwrap(), crlf(expected));
    }

    #[tokio::test]
    async fn no_content_has_no_length() {
        let mut writer = MessageWriter::new(Vec::new());
        let response = Response::builder().status(StatusCode::NO_CONTENT).body(Body::empty()).unwrap();
        writer.write_response(&response, false).await.unwrap();
        writer.write_continue(Version::HTTP_11).await.unwrap();

        let output = String::from_utf8(writer.get_mut().clone()).unwrap();
        assert_eq!(output, "HTTP/1.1 204 No Content\r\n\r\nHTTP/1.1 100 Continue\r\n\r\n");
    }

    #[tokio::test]
    async fn no_content_drops_handler_body() {
        let mut writer = MessageWriter::new(Vec::new());
        let response = Response::builder().status(StatusCode::NO_CONTENT).body(Body::full("ignored")).unwrap();
        writer.write_response(&response, false).await.unwrap();

        assert_eq!(String::from_utf8(writer.get_mut().clone()).unwrap(), "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[tokio::test]
    async fn aborted_body_is_an_error() {
        let body = Body::new();
        body.write("partial");
        body.abort();

        let mut writer = MessageWriter::new(Vec::new());
        let result = writer.write_response(&Response::new(body), false).await;
        assert!(matches!(result, Err(HttpError::Send { .. })));
    }
}
