//! Server-side Query Forwarder: one ephemeral UDP socket per inbound
//! frame, forwarded to the configured upstream resolver and raced against
//! a one-second deadline.
//!
//! The socket construction mirrors the client's `bind_tuned_udp_socket` in
//! `client/listener.rs` (`socket2` for nonblocking + no-broadcast, then
//! handed to `tokio::net::UdpSocket::from_std`), generalized to bind an
//! ephemeral port per query instead of one long-lived listener, and
//! extended to request Don't-Fragment where the platform exposes it.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;

use crate::errors::ForwarderError;
use crate::proto::MAX_DNS_MESSAGE_SIZE;

const UPSTREAM_DEADLINE: Duration = Duration::from_secs(1);

/// Forward one query's payload to `resolver` and, on a timely reply, push
/// `(id, payload)` onto `outbound` for the session writer to frame and
/// send. Every error is a reason to drop this one query only; the caller
/// logs it and the session continues.
pub async fn forward(
    id: u32,
    payload: Vec<u8>,
    resolver: SocketAddr,
    outbound: UnboundedSender<(u32, Vec<u8>)>,
) -> Result<(), ForwarderError> {
    let socket = bind_ephemeral_udp_socket(resolver)?;
    socket.send_to(&payload, resolver).await?;

    let mut buf = vec![0u8; MAX_DNS_MESSAGE_SIZE];
    let (len, _from) = tokio::time::timeout(UPSTREAM_DEADLINE, socket.recv_from(&mut buf))
        .await
        .map_err(|_| ForwarderError::UpstreamTimeout)??;

    let _ = outbound.send((id, buf[..len].to_vec()));
    Ok(())
}

fn bind_ephemeral_udp_socket(resolver: SocketAddr) -> std::io::Result<UdpSocket> {
    let domain = if resolver.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.set_broadcast(false)?;

    #[cfg(target_os = "linux")]
    {
        // Best-effort: a resolver's reply is never large enough to need
        // fragmentation, and a fragmented reply is a signal worth seeing
        // as an error rather than silently reassembling.
        let _ = socket.set_mtu_discover(socket2::MtuDiscover::Do);
    }

    let bind_addr: SocketAddr = if resolver.is_ipv6() {
        "[::]:0".parse().expect("valid unspecified ipv6 address")
    } else {
        "0.0.0.0:0".parse().expect("valid unspecified ipv4 address")
    };
    socket.bind(&bind_addr.into())?;
    UdpSocket::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket as TokioUdpSocket;

    #[tokio::test]
    async fn forwards_payload_and_returns_reply() {
        let upstream = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();

        let echo = tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            let (len, from) = upstream.recv_from(&mut buf).await.unwrap();
            upstream.send_to(&buf[..len], from).await.unwrap();
        });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        forward(7, b"query".to_vec(), upstream_addr, tx).await.unwrap();
        echo.await.unwrap();

        let (id, payload) = rx.recv().await.unwrap();
        assert_eq!(id, 7);
        assert_eq!(payload, b"query");
    }

    #[tokio::test]
    async fn silent_upstream_times_out() {
        let black_hole = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let black_hole_addr = black_hole.local_addr().unwrap();
        // Never reply; keep the socket alive for the duration of the test.
        let _keep_alive = black_hole;

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let result = forward(1, b"query".to_vec(), black_hole_addr, tx).await;
        assert!(matches!(result, Err(ForwarderError::UpstreamTimeout)));
    }
}
