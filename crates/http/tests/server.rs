use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use http::{Request, Response, StatusCode};
use indoc::indoc;
use pipeline_http::connection::{ConnectionConfig, ServerConnection};
use pipeline_http::handler::make_handler;
use pipeline_http::protocol::body::Body;
use pipeline_http::protocol::{ConnectionInfo, HttpError};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

type BoxError = Box<dyn Error + Send + Sync>;

static EFFECTS: AtomicUsize = AtomicUsize::new(0);

async fn route(request: Request<Body>) -> Result<Response<Body>, BoxError> {
    match request.uri().path() {
        "/slow" => {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Response::new(Body::full("slow")))
        }
        "/fast" => Ok(Response::new(Body::full("fast"))),
        "/sequence" => {
            let info = request.extensions().get::<ConnectionInfo>().ok_or("missing connection info")?;
            Ok(Response::new(Body::from(info.sequence.to_string())))
        }
        "/echo" => {
            let data = request.body().to_bytes().await;
            Ok(Response::new(Body::full(data)))
        }
        "/ignore" => Ok(Response::new(Body::full("ok"))),
        "/fail" => Err("handler failed".into()),
        "/close" => Ok(Response::builder().header("Connection", "close").body(Body::full("bye"))?),
        "/close-slowly" => {
            let body = Body::new();
            let writer = body.clone();
            tokio::spawn(async move {
                writer.write("part");
                tokio::time::sleep(Duration::from_millis(100)).await;
                writer.close_write();
            });
            Ok(Response::builder().header("Connection", "close").body(body)?)
        }
        "/effect" => {
            EFFECTS.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(Body::full("done")))
        }
        _ => Ok(Response::builder().status(StatusCode::NOT_FOUND).body(Body::empty())?),
    }
}

fn start(config: ConnectionConfig) -> (DuplexStream, JoinHandle<Result<(), HttpError>>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(async move {
        let (reader, writer) = tokio::io::split(server);
        ServerConnection::with_config(reader, writer, config).process(Arc::new(make_handler(route))).await
    });
    (client, task)
}

fn crlf(raw: &str) -> String {
    raw.replace('\n', "\r\n")
}

async fn read_until(client: &mut DuplexStream, needle: &str) -> String {
    let mut received = Vec::new();
    let mut buffer = [0u8; 1024];
    while !String::from_utf8_lossy(&received).contains(needle) {
        let read = client.read(&mut buffer).await.unwrap();
        assert!(read > 0, "connection closed before {needle:?} arrived");
        received.extend_from_slice(&buffer[..read]);
    }
    String::from_utf8(received).unwrap()
}

async fn read_to_close(client: &mut DuplexStream) -> String {
    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    String::from_utf8(received).unwrap()
}

#[tokio::test]
async fn pipelined_responses_keep_request_order() {
    let (mut client, task) = start(ConnectionConfig::default());
    client.write_all(crlf("GET /slow HTTP/1.1\nHost: x\n\nGET /fast HTTP/1.1\nHost: x\n\n").as_bytes()).await.unwrap();
    client.shutdown().await.unwrap();

    let expected = indoc! {"
        HTTP/1.1 200 OK
        connection: keep-alive
        Content-Length: 4

        slowHTTP/1.1 200 OK
        connection: keep-alive
        Content-Length: 4

        fast"};
    assert_eq!(read_to_close(&mut client).await, crlf(expected));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn requests_are_numbered_per_connection() {
    let (mut client, task) = start(ConnectionConfig::default());
    client.write_all(crlf("GET /sequence HTTP/1.1\n\nGET /sequence HTTP/1.1\n\n").as_bytes()).await.unwrap();
    client.shutdown().await.unwrap();

    let output = read_to_close(&mut client).await;
    assert!(output.ends_with("\r\n\r\n0HTTP/1.1 200 OK\r\nconnection: keep-alive\r\nContent-Length: 1\r\n\r\n1"));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn keep_alive_serves_several_requests() {
    let (mut client, task) = start(ConnectionConfig::default());

    client.write_all(crlf("GET /fast HTTP/1.1\n\n").as_bytes()).await.unwrap();
    let first = read_until(&mut client, "fast").await;
    assert!(first.starts_with("HTTP/1.1 200 OK\r\nconnection: keep-alive\r\n"));

    client.write_all(crlf("GET /ignore HTTP/1.1\n\n").as_bytes()).await.unwrap();
    let second = read_until(&mut client, "ok").await;
    assert!(second.ends_with("Content-Length: 2\r\n\r\nok"));

    client.shutdown().await.unwrap();
    assert_eq!(read_to_close(&mut client).await, "");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn http_10_closes_after_response() {
    let (mut client, task) = start(ConnectionConfig::default());
    client.write_all(crlf("GET /fast HTTP/1.0\n\n").as_bytes()).await.unwrap();

    let expected = indoc! {"
        HTTP/1.1 200 OK
        connection: close
        Content-Length: 4

        fast"};
    assert_eq!(read_to_close(&mut client).await, crlf(expected));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn http_10_keep_alive_is_honoured() {
    let (mut client, task) = start(ConnectionConfig::default());
    client.write_all(crlf("GET /fast HTTP/1.0\nConnection: keep-alive\n\n").as_bytes()).await.unwrap();
    let response = read_until(&mut client, "fast").await;
    assert!(response.contains("connection: keep-alive\r\n"));

    client.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn response_close_ends_connection() {
    let (mut client, task) = start(ConnectionConfig::default());
    client.write_all(crlf("GET /close HTTP/1.1\n\n").as_bytes()).await.unwrap();

    let output = read_to_close(&mut client).await;
    assert!(output.contains("connection: close\r\n"));
    assert!(output.ends_with("bye"));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn disabled_keep_alive_closes_every_connection() {
    let (mut client, task) = start(ConnectionConfig::default().keep_alive(false));
    client.write_all(crlf("GET /fast HTTP/1.1\n\n").as_bytes()).await.unwrap();

    let output = read_to_close(&mut client).await;
    assert!(output.contains("connection: close\r\n"));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn handler_error_becomes_500() {
    let (mut client, task) = start(ConnectionConfig::default());
    client.write_all(crlf("GET /fail HTTP/1.1\n\n").as_bytes()).await.unwrap();
    client.shutdown().await.unwrap();

    let expected = indoc! {"
        HTTP/1.1 500 Internal Server Error
        connection: keep-alive
        Content-Length: 0

    "};
    assert_eq!(read_to_close(&mut client).await, crlf(expected));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_request_gets_400_and_close() {
    let (mut client, task) = start(ConnectionConfig::default());
    client.write_all(b"NOT HTTP AT ALL\r\n\r\n").await.unwrap();

    let expected = indoc! {"
        HTTP/1.1 400 Bad Request
        connection: close
        Content-Length: 0

    "};
    assert_eq!(read_to_close(&mut client).await, crlf(expected));
    assert!(matches!(task.await.unwrap(), Err(HttpError::Parse { .. })));
}

#[tokio::test]
async fn expect_continue_is_answered_before_body() {
    let (mut client, task) = start(ConnectionConfig::default());
    client
        .write_all(crlf("POST /echo HTTP/1.1\nExpect: 100-continue\nContent-Length: 5\n\n").as_bytes())
        .await
        .unwrap();

    let interim = read_until(&mut client, "\r\n\r\n").await;
    assert_eq!(interim, "HTTP/1.1 100 Continue\r\n\r\n");

    client.write_all(b"hello").await.unwrap();
    let response = read_until(&mut client, "hello").await;
    assert_eq!(response, "HTTP/1.1 200 OK\r\nconnection: keep-alive\r\nContent-Length: 5\r\n\r\nhello");

    client.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn head_response_has_no_body() {
    let (mut client, task) = start(ConnectionConfig::default());
    client.write_all(crlf("HEAD /fast HTTP/1.1\n\n").as_bytes()).await.unwrap();
    client.shutdown().await.unwrap();

    assert_eq!(read_to_close(&mut client).await, "HTTP/1.1 200 OK\r\nconnection: keep-alive\r\nContent-Length: 4\r\n\r\n");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn unread_body_is_drained_after_response() {
    let (mut client, task) = start(ConnectionConfig::default().body_high_water(4));
    client.write_all(crlf("POST /ignore HTTP/1.1\nContent-Length: 32\n\n").as_bytes()).await.unwrap();
    client.write_all(b"01234567").await.unwrap();
    let first = read_until(&mut client, "ok").await;
    assert!(first.starts_with("HTTP/1.1 200 OK"));

    client.write_all(b"89abcdefghijklmnopqrstuv").await.unwrap();
    client.write_all(crlf("GET /fast HTTP/1.1\n\n").as_bytes()).await.unwrap();
    let second = read_until(&mut client, "fast").await;
    assert!(second.starts_with("HTTP/1.1 200 OK"));

    client.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn idle_connection_is_closed() {
    let (mut client, task) = start(ConnectionConfig::default().idle_timeout(Some(Duration::from_millis(50))));

    let output = tokio::time::timeout(Duration::from_secs(2), read_to_close(&mut client)).await.unwrap();
    assert_eq!(output, "");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn slow_pipelined_handler_outlives_idle_timeout() {
    let (mut client, task) = start(ConnectionConfig::default().idle_timeout(Some(Duration::from_millis(20))));
    client.write_all(crlf("GET /fast HTTP/1.1\n\nGET /slow HTTP/1.1\n\n").as_bytes()).await.unwrap();

    let expected = indoc! {"
        HTTP/1.1 200 OK
        connection: keep-alive
        Content-Length: 4

        fastHTTP/1.1 200 OK
        connection: keep-alive
        Content-Length: 4

        slow"};
    let output = tokio::time::timeout(Duration::from_secs(2), read_to_close(&mut client)).await.unwrap();
    assert_eq!(output, crlf(expected));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn idle_timeout_in_partial_request_is_an_error() {
    let (mut client, task) = start(ConnectionConfig::default().idle_timeout(Some(Duration::from_millis(20))));
    client.write_all(b"GET /fast HTTP/1.1\r\nHost: x").await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert!(matches!(result, Err(HttpError::Timeout(_))));
    assert_eq!(read_to_close(&mut client).await, "");
}

#[tokio::test]
async fn requests_after_response_close_are_not_handled() {
    let (mut client, task) = start(ConnectionConfig::default());
    client.write_all(crlf("GET /close-slowly HTTP/1.1\n\n").as_bytes()).await.unwrap();

    let head = read_until(&mut client, "part").await;
    assert!(head.contains("connection: close\r\n"));
    assert!(head.ends_with("4\r\npart\r\n"));

    client.write_all(crlf("POST /effect HTTP/1.1\nContent-Length: 0\n\n").as_bytes()).await.unwrap();
    let rest = read_to_close(&mut client).await;
    assert_eq!(rest, "0\r\n\r\n");
    assert_eq!(EFFECTS.load(Ordering::SeqCst), 0);
    task.await.unwrap().unwrap();
}
