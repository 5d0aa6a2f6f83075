use bytes::BytesMut;
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use http::{Method, Request, Response, StatusCode, Version};
use pipeline_http::codec::{Assembler, Builder, Tokenizer};
use pipeline_http::connection::ServerConnection;
use pipeline_http::handler::make_handler;
use pipeline_http::protocol::body::Body;
use std::{
    error::Error,
    hint::black_box,
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

// Mock IO for testing
#[derive(Clone)]
struct MockIO {
    read_data: Vec<u8>,
    write_data: Vec<u8>,
    read_pos: usize,
}

impl MockIO {
    fn new(read_data: Vec<u8>) -> Self {
        Self { read_data, write_data: Vec::new(), read_pos: 0 }
    }
}

impl AsyncRead for MockIO {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let remaining = &self.read_data[self.read_pos..];
        let amt = std::cmp::min(remaining.len(), buf.remaining());
        buf.put_slice(&remaining[..amt]);
        self.read_pos += amt;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockIO {
    fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize, io::Error>> {
        self.write_data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }
}

async fn test_handler(_req: Request<Body>) -> Result<Response<Body>, Box<dyn Error + Send + Sync>> {
    let response = Response::builder().status(StatusCode::OK).body(Body::full("Hello World!"))?;
    Ok(response)
}

const PIPELINED: &[u8] = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n\
    POST /items HTTP/1.1\r\nHost: localhost\r\nContent-Length: 11\r\n\r\nhello world\
    GET /chunks HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";

fn bench_assembler(c: &mut Criterion) {
    c.bench_function("assemble_pipelined_requests", |b| {
        b.iter_batched_ref(
            || BytesMut::from(PIPELINED),
            |bytes| {
                let mut tokenizer = Tokenizer::requests();
                let mut assembler = Assembler::new();
                while let Some(request) = assembler.drive(&mut tokenizer, bytes).unwrap() {
                    black_box(request);
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_builder(c: &mut Criterion) {
    c.bench_function("build_identity_response", |b| {
        let mut builder = Builder::new();
        b.iter(|| {
            builder.response_line(200, Version::HTTP_11).unwrap();
            builder.header("Content-Type", "text/plain", Some("utf-8")).unwrap();
            builder.header("Content-Length", "12", None).unwrap();
            builder.body("Hello World!").unwrap();
            builder.complete().unwrap();
            black_box(builder.take_output());
        });
    });

    c.bench_function("build_chunked_request", |b| {
        let mut builder = Builder::new();
        b.iter(|| {
            builder.request_line(&Method::POST, "/upload", Version::HTTP_11).unwrap();
            builder.header("Host", "localhost", None).unwrap();
            builder.body(vec!["first ", "second ", "third"]).unwrap();
            builder.complete().unwrap();
            black_box(builder.take_output());
        });
    });
}

fn bench_server_connection(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let handler = Arc::new(make_handler(test_handler));

    c.bench_function("process_pipelined_requests", |b| {
        b.to_async(&runtime).iter(|| {
            let handler = handler.clone();
            async move {
                let mock_io = MockIO::new(PIPELINED.to_vec());
                let (reader, writer) = (mock_io.clone(), mock_io);
                let connection = ServerConnection::new(reader, writer);
                black_box(connection.process(handler).await.unwrap());
            }
        });
    });
}

criterion_group!(benches, bench_assembler, bench_builder, bench_server_connection);
criterion_main!(benches);
