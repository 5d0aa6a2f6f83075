use async_trait::async_trait;
use http::{Method, Request, Response, StatusCode};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use pipeline_http::connection::{ConnectionConfig, ServerConnection};
use pipeline_http::handler::Handler;
use pipeline_http::protocol::ConnectionInfo;
use pipeline_http::protocol::body::Body;
use tokio::net::TcpListener;

use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!(port = 8080, "start listening");
    let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
        Ok(tcp_listener) => tcp_listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    let config = ConnectionConfig::default().idle_timeout(Some(Duration::from_secs(10)));
    let handler = Arc::new(EchoHandler);
    loop {
        let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        let handler = handler.clone();
        let config = config.clone();

        tokio::spawn(async move {
            let (reader, writer) = tcp_stream.into_split();
            let connection = ServerConnection::with_config(reader, writer, config).peer_addr(remote_addr);
            if let Err(e) = connection.process(handler).await {
                error!(cause = %e, %remote_addr, "connection process error");
            }
        });
    }
}

/// Answers `POST` with the request body and anything else with a greeting
/// naming the request's position on its connection.
struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    type RespBody = Body;
    type Error = Box<dyn Error + Send + Sync>;

    async fn call(&self, request: Request<Body>) -> Result<Response<Self::RespBody>, Self::Error> {
        if request.method() == Method::POST {
            let body = request.body().to_bytes().await;
            info!(len = body.len(), path = request.uri().path(), "echoing request body");
            return Ok(Response::new(Body::full(body)));
        }

        let sequence = request.extensions().get::<ConnectionInfo>().map_or(0, |info| info.sequence);
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from(format!("Hello World! (request #{sequence} on this connection)\r\n")))?;
        Ok(response)
    }
}
