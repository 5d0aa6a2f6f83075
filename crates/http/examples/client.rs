use bytes::Bytes;
use http::{Method, Request};
use tokio::net::TcpStream;

use pipeline_http::connection::{ConnectionConfig, handshake};
use pipeline_http::protocol::body::Body;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Sends three pipelined requests to the `server` example.
#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let tcp_stream = match TcpStream::connect("127.0.0.1:8080").await {
        Ok(tcp_stream) => tcp_stream,
        Err(e) => {
            error!(cause = %e, "connect error");
            return;
        }
    };

    let (reader, writer) = tcp_stream.into_split();
    let (sender, connection) = handshake(reader, writer, ConnectionConfig::default());
    let driver = tokio::spawn(connection.run());

    let get = |path: &str| Request::builder().uri(path).header("Host", "127.0.0.1").body(Body::empty());
    let post = Request::builder().method(Method::POST).uri("/echo").header("Host", "127.0.0.1").body(Body::full(Bytes::from_static(b"ping")));

    let requests = match (get("/first"), post, get("/last")) {
        (Ok(first), Ok(post), Ok(last)) => [first, post, last],
        _ => {
            error!("invalid request");
            return;
        }
    };

    let [first, second, third] = requests;
    let responses = tokio::join!(sender.send(first), sender.send(second), sender.send(third));
    for response in [responses.0, responses.1, responses.2] {
        match response {
            Ok(response) => {
                let body = response.body().to_bytes().await;
                info!(status = response.status().as_u16(), body = %String::from_utf8_lossy(&body), "received response");
            }
            Err(e) => error!(cause = %e, "request failed"),
        }
    }

    drop(sender);
    match driver.await {
        Ok(Ok(())) => info!("connection finished"),
        Ok(Err(e)) => error!(cause = %e, "connection error"),
        Err(e) => error!(cause = %e, "driver panicked"),
    }
}
