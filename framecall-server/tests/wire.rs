//! Wire-level tests driving a live server with a raw framed socket.

use framecall_protocol::{Envelope, EnvelopeKind, FramedStream, ProtocolError};
use framecall_server::{MethodRegistry, Server, ServerConfig};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server(config: ServerConfig) -> Arc<Server> {
    let registry = Arc::new(MethodRegistry::new());
    registry.register("echo", "ping", |args: Value| Ok(args));

    let server = Arc::new(Server::bind(config, registry).await.unwrap());
    let runner = Arc::clone(&server);
    tokio::spawn(async move { runner.run().await });
    server
}

async fn connect(server: &Server) -> FramedStream<TcpStream> {
    let stream = TcpStream::connect(server.local_addr()).await.unwrap();
    FramedStream::new(stream, TIMEOUT)
}

/// Polls an atomic gauge until it reaches `expected`.
async fn wait_for(gauge: &AtomicU64, expected: u64) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while gauge.load(Ordering::Relaxed) != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "gauge did not reach {expected}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_keep_alive_session_over_tcp() {
    let server = start_server(ServerConfig::new("127.0.0.1:0".parse().unwrap())).await;
    let mut client = connect(&server).await;

    client.send_envelope(&Envelope::connect(1, "client")).await.unwrap();
    let ack = client.read_envelope().await.unwrap();
    assert!(ack.confirms_keep_alive());
    wait_for(&server.stats().persistent_connections, 1).await;

    for id in [2u64, 3] {
        let invoke = Envelope::invoke(id, "client", "echo", "ping", json!({"seq": id}));
        client.send_envelope(&invoke).await.unwrap();
        let reply = client.read_envelope().await.unwrap();
        assert_eq!(reply.kind, EnvelopeKind::Ok);
        assert_eq!(reply.callid, Some(id));
    }

    // Closing the socket retires the connection and its gauges.
    drop(client);
    wait_for(&server.stats().persistent_connections, 0).await;
    wait_for(&server.stats().connections_active, 0).await;

    server.shutdown();
}

#[tokio::test]
async fn test_plain_socket_closed_after_one_invoke() {
    let server = start_server(ServerConfig::new("127.0.0.1:0".parse().unwrap())).await;
    let mut client = connect(&server).await;

    let invoke = Envelope::invoke(1, "client", "echo", "ping", json!({}));
    client.send_envelope(&invoke).await.unwrap();
    let reply = client.read_envelope().await.unwrap();
    assert_eq!(reply.kind, EnvelopeKind::Ok);

    assert!(matches!(
        client.read_envelope().await,
        Err(ProtocolError::UnexpectedEof)
    ));
    wait_for(&server.stats().connections_active, 0).await;

    server.shutdown();
}

#[tokio::test]
async fn test_shutdown_completes_live_connections() {
    let server = start_server(ServerConfig::new("127.0.0.1:0".parse().unwrap())).await;
    let mut client = connect(&server).await;

    client.send_envelope(&Envelope::connect(1, "client")).await.unwrap();
    client.read_envelope().await.unwrap();

    server.shutdown();

    // The driver exits on the shutdown signal and drops the socket.
    assert!(client.read_envelope().await.is_err());
    wait_for(&server.stats().connections_active, 0).await;
}

#[tokio::test]
async fn test_connection_limit_rejects_excess() {
    let config =
        ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_max_connections(1);
    let server = start_server(config).await;

    let mut first = connect(&server).await;
    first.send_envelope(&Envelope::connect(1, "client")).await.unwrap();
    first.read_envelope().await.unwrap();
    wait_for(&server.stats().connections_active, 1).await;

    // Over the limit: the socket is dropped without service.
    let mut second = connect(&server).await;
    let _ = second.send_envelope(&Envelope::connect(1, "client")).await;
    assert!(second.read_envelope().await.is_err());

    server.shutdown();
}

#[tokio::test]
async fn test_read_timeout_completes_connection() {
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
        .with_read_timeout(Duration::from_millis(100));
    let server = start_server(config).await;

    let mut client = connect(&server).await;
    client.send_envelope(&Envelope::connect(1, "client")).await.unwrap();
    let ack = client.read_envelope().await.unwrap();
    assert!(ack.confirms_keep_alive());

    // Stay silent past the read timeout; the server completes the
    // connection even though it was persistent.
    assert!(matches!(
        client.read_envelope().await,
        Err(ProtocolError::UnexpectedEof)
    ));
    wait_for(&server.stats().persistent_connections, 0).await;
    wait_for(&server.stats().connections_active, 0).await;

    server.shutdown();
}
