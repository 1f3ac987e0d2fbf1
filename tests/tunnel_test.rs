//! End-to-end tests: an in-process tunnel server authenticating over a
//! real loopback TCP connection, a fake upstream UDP resolver, and the
//! client's `UpstreamSession` talking to both.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dns_tunnel::client::session::UpstreamSession;
use dns_tunnel::pending::Outcome;
use dns_tunnel::server::registry::SessionRegistry;
use dns_tunnel::shutdown::ShutdownHandle;
use tokio::net::{TcpListener, UdpSocket};

/// Spawn an upstream UDP "resolver" that echoes every datagram it receives
/// back to its sender, unmodified.
async fn spawn_echo_upstream() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        loop {
            let (len, from) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => return,
            };
            let _ = socket.send_to(&buf[..len], from).await;
        }
    });
    addr
}

/// Spawn an upstream UDP socket that never replies, for timeout tests.
async fn spawn_silent_upstream() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        let _ = socket.recv_from(&mut buf).await;
        // never reply; keep the socket open for the test's duration
        tokio::time::sleep(Duration::from_secs(5)).await;
    });
    addr
}

/// Run a tunnel server: accepts connections concurrently, authenticates each
/// against `token`, and forwards frames to `resolver` until its client
/// disconnects or it is displaced by a newer connection for the same token.
async fn spawn_tunnel_server(token: &'static str, resolver: SocketAddr) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(SessionRegistry::new());
    let tokens: Arc<std::collections::HashSet<String>> = Arc::new([token.to_string()].into_iter().collect());

    tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            let tokens = tokens.clone();
            let registry = registry.clone();
            let shutdown = ShutdownHandle::new();
            tokio::spawn(dns_tunnel::server::accept_one_for_tests(stream, peer, tokens, registry, resolver, shutdown));
        }
    });
    addr
}

#[tokio::test]
async fn happy_path_roundtrip() {
    let resolver = spawn_echo_upstream().await;
    let server_addr = spawn_tunnel_server("secret-token", resolver).await;

    let shutdown = ShutdownHandle::new();
    let session = UpstreamSession::connect(&format!("ws://{server_addr}/"), "secret-token", shutdown)
        .await
        .expect("client should connect and authenticate");

    let source: SocketAddr = "127.0.0.1:9000".parse().unwrap();
    match session.query(source, b"hello dns".to_vec()).await {
        Outcome::Response(payload) => assert_eq!(payload, b"hello dns"),
        _ => panic!("expected a response from the echo upstream"),
    }
}

#[tokio::test]
async fn upstream_silence_yields_timeout() {
    let resolver = spawn_silent_upstream().await;
    let server_addr = spawn_tunnel_server("secret-token", resolver).await;

    let shutdown = ShutdownHandle::new();
    let session = UpstreamSession::connect(&format!("ws://{server_addr}/"), "secret-token", shutdown)
        .await
        .unwrap();

    let source: SocketAddr = "127.0.0.1:9001".parse().unwrap();
    let outcome = session.query(source, b"no reply coming".to_vec()).await;
    assert!(matches!(outcome, Outcome::TimedOut));
}

#[tokio::test]
async fn concurrent_queries_get_matched_independently() {
    let resolver = spawn_echo_upstream().await;
    let server_addr = spawn_tunnel_server("secret-token", resolver).await;

    let shutdown = ShutdownHandle::new();
    let session = UpstreamSession::connect(&format!("ws://{server_addr}/"), "secret-token", shutdown)
        .await
        .unwrap();

    let source: SocketAddr = "127.0.0.1:9002".parse().unwrap();
    let a = session.query(source, b"query-a".to_vec());
    let b = session.query(source, b"query-b".to_vec());
    let (outcome_a, outcome_b) = tokio::join!(a, b);

    match (outcome_a, outcome_b) {
        (Outcome::Response(pa), Outcome::Response(pb)) => {
            assert_eq!(pa, b"query-a");
            assert_eq!(pb, b"query-b");
        }
        other => panic!("expected both queries to resolve independently: {other:?}"),
    }
}

#[tokio::test]
async fn token_displacement_tears_down_the_older_session() {
    let resolver = spawn_echo_upstream().await;
    let server_addr = spawn_tunnel_server("displaced-token", resolver).await;

    let shutdown_a = ShutdownHandle::new();
    let session_a = UpstreamSession::connect(&format!("ws://{server_addr}/"), "displaced-token", shutdown_a)
        .await
        .expect("first connection should authenticate");

    let source: SocketAddr = "127.0.0.1:9010".parse().unwrap();
    match session_a.query(source, b"still alive".to_vec()).await {
        Outcome::Response(payload) => assert_eq!(payload, b"still alive"),
        other => panic!("first session should work before being displaced: {other:?}"),
    }

    // A second connection with the same token displaces the first.
    let shutdown_b = ShutdownHandle::new();
    let _session_b = UpstreamSession::connect(&format!("ws://{server_addr}/"), "displaced-token", shutdown_b)
        .await
        .expect("second connection should authenticate");

    // Give the server a moment to cancel the displaced session.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = tokio::time::timeout(Duration::from_secs(1), session_a.query(source, b"should be gone".to_vec()))
        .await
        .expect("a displaced session must not hang a caller");
    assert!(
        matches!(outcome, Outcome::Cancelled),
        "displaced session should be torn down rather than merely stop responding: {outcome:?}"
    );
}

#[tokio::test]
async fn protocol_violation_after_auth_ends_the_session() {
    use tokio_tungstenite::tungstenite::Message;

    let resolver = spawn_echo_upstream().await;
    let server_addr = spawn_tunnel_server("secret-token", resolver).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{server_addr}/"))
        .await
        .expect("handshake should succeed");

    futures_util::SinkExt::send(&mut ws, Message::Text("secret-token".into()))
        .await
        .expect("auth frame should send");

    // A TEXT frame after authentication violates the binary-only protocol.
    futures_util::SinkExt::send(&mut ws, Message::Text("not a binary frame".into()))
        .await
        .expect("violating frame should send");

    let next = tokio::time::timeout(Duration::from_secs(1), futures_util::StreamExt::next(&mut ws))
        .await
        .expect("server must not hang after a protocol violation");
    match next {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("expected the server to close the session after a protocol violation: {other:?}"),
    }
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let resolver = spawn_echo_upstream().await;
    let server_addr = spawn_tunnel_server("the-real-token", resolver).await;

    let shutdown = ShutdownHandle::new();
    let result = UpstreamSession::connect(&format!("ws://{server_addr}/"), "wrong-token", shutdown).await;

    // The session object itself may be constructed (the handshake
    // succeeds before auth is checked), but the server closes the
    // connection immediately after, so the very first query never comes back.
    if let Ok(session) = result {
        let source: SocketAddr = "127.0.0.1:9003".parse().unwrap();
        let outcome = session.query(source, b"anything".to_vec()).await;
        assert!(matches!(outcome, Outcome::Cancelled | Outcome::TimedOut));
    }
}
