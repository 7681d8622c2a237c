//! TLS on both sides: self-signed https backends and the secure listener

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::rustls::pki_types::ServerName;

use switchyard::http::request::{Method, RequestBuilder};
use switchyard::proxy::dispatcher::Dispatcher;
use switchyard::proxy::routing::RoutingTable;
use switchyard::proxy::tls::connector;
use switchyard::proxy::upstream::{ForwardMeta, ForwardingEngine, HttpForwarder, Protocol};
use switchyard::server::listener::{bind, ListenerSupervisor};
use switchyard::server::tls::load_acceptor;
use switchyard::ProxyError;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// https backend with a self-signed certificate answering `secret`.
async fn self_signed_backend() -> SocketAddr {
    let acceptor = load_acceptor(&fixture("backend.pem"), &fixture("backend.key")).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                // rejected handshakes end here
                let Ok(mut stream) = acceptor.accept(socket).await else {
                    return;
                };

                let mut head = Vec::new();
                let mut chunk = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&chunk[..n]),
                    }
                }

                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nsecret")
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}

fn meta() -> ForwardMeta {
    ForwardMeta::new(
        "127.0.0.1:50000".parse().unwrap(),
        Protocol::Http,
        Some("backend.test".to_string()),
    )
}

fn forwarder() -> HttpForwarder {
    HttpForwarder::new(Duration::from_secs(2), Duration::from_secs(5))
}

#[tokio::test]
async fn test_insecure_forwarder_reaches_self_signed_backend() {
    let backend = self_signed_backend().await;
    let target = format!("https://127.0.0.1:{}", backend.port());

    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .build()
        .unwrap();

    let response = forwarder()
        .with_secure(false)
        .forward(&request, &target, &meta())
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.body, b"secret".to_vec());
}

#[tokio::test]
async fn test_secure_forwarder_rejects_self_signed_backend() {
    let backend = self_signed_backend().await;
    let target = format!("https://127.0.0.1:{}", backend.port());

    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .build()
        .unwrap();

    let result = forwarder().forward(&request, &target, &meta()).await;

    assert!(matches!(result, Err(ProxyError::Upstream { .. })));
}

#[tokio::test]
async fn test_secure_listener_marks_forwarded_proto() {
    let (backend, seen) = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<String>();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut chunk = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut chunk).await.unwrap();
                head.extend_from_slice(&chunk[..n]);
            }
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await
                .unwrap();
            let _ = tx.send(String::from_utf8(head).unwrap());
        });

        (addr, rx)
    };

    let table = RoutingTable::default();
    table.register("secure.example.com", &backend.to_string()).await;
    let dispatcher = Arc::new(Dispatcher::new(table, forwarder()));

    let plain = bind("127.0.0.1:0", false).await.unwrap();
    let secure = bind("127.0.0.1:0", false).await.unwrap();
    let acceptor = load_acceptor(&fixture("backend.pem"), &fixture("backend.key")).unwrap();

    let proxy = ListenerSupervisor::from_listeners(dispatcher, plain, Some((secure, acceptor)));
    let secure_addr = proxy.secure_addr().unwrap().unwrap();
    tokio::spawn(proxy.serve());

    let socket = tokio::net::TcpStream::connect(secure_addr).await.unwrap();
    let mut stream = connector(false)
        .connect(ServerName::try_from("backend.test").unwrap(), socket)
        .await
        .unwrap();

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: secure.example.com\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    let response = String::from_utf8(response).unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("ok"));

    let head = seen.await.unwrap();
    assert!(head.contains("X-Forwarded-Proto: https\r\n"));
    assert!(head.contains("X-Forwarded-Port: 443\r\n"));
}
