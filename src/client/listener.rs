//! The UDP Listener Pool: one receive loop per configured bind address,
//! handing each datagram to the [`UpstreamSession`] and writing the
//! eventual reply back to its exact originating address.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::pending::Outcome;
use crate::proto::MAX_DNS_MESSAGE_SIZE;
use crate::shutdown::ShutdownHandle;

use super::session::UpstreamSession;

/// Minimum socket buffer size, matching the largest UDP datagram this
/// system will ever carry.
const SOCKET_BUFFER_SIZE: usize = MAX_DNS_MESSAGE_SIZE;

/// Bind a UDP socket tuned for large DNS datagrams: generous send/receive
/// buffers, broadcast disabled, fragmentation left permissive on the
/// loopback reply path. Configured via `socket2` before handing the file
/// descriptor to tokio, the same two-step construction the wider codebase
/// uses for non-default socket options.
fn bind_tuned_udp_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.set_broadcast(false)?;
    socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
    socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Runs the whole pool of configured UDP listeners until `shutdown` fires
/// or every listener has permanently failed. Each bind address gets its
/// own task; datagrams on a given socket are handled concurrently, one
/// spawned task per datagram, so a slow upstream round trip never blocks
/// that listener's receive loop.
pub async fn run_pool(binds: Vec<SocketAddr>, session: UpstreamSession, shutdown: ShutdownHandle) {
    let active = Arc::new(AtomicUsize::new(binds.len()));
    let mut tasks = Vec::with_capacity(binds.len());

    for bind in binds {
        let session = session.clone();
        let shutdown = shutdown.clone();
        let active = active.clone();
        tasks.push(tokio::spawn(async move {
            run_one_listener(bind, session, shutdown.clone()).await;
            if active.fetch_sub(1, Ordering::SeqCst) == 1 {
                tracing::error!("UDP listener pool is empty, initiating shutdown");
                shutdown.cancel();
            }
        }));
    }

    for task in tasks {
        let _ = task.await;
    }
}

async fn run_one_listener(bind: SocketAddr, session: UpstreamSession, shutdown: ShutdownHandle) {
    let socket = match bind_tuned_udp_socket(bind) {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            tracing::error!(%bind, error = %e, "failed to bind UDP listener");
            return;
        }
    };

    tracing::info!(%bind, "UDP listener ready");
    let mut buf = vec![0u8; MAX_DNS_MESSAGE_SIZE];

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(%bind, "UDP listener cancelled");
                break;
            }
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, source)) => {
                        let payload = buf[..len].to_vec();
                        let socket = socket.clone();
                        let session = session.clone();
                        tokio::spawn(async move {
                            forward_datagram(socket, session, source, payload).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(%bind, error = %e, "transient UDP receive error");
                    }
                }
            }
        }
    }
}

async fn forward_datagram(socket: Arc<UdpSocket>, session: UpstreamSession, source: SocketAddr, payload: Vec<u8>) {
    match session.query(source, payload).await {
        Outcome::Response(reply) => {
            if let Err(e) = socket.send_to(&reply, source).await {
                tracing::warn!(%source, error = %e, "failed to write reply datagram");
            }
        }
        Outcome::TimedOut => {
            tracing::debug!(%source, "query timed out, no reply sent");
        }
        Outcome::Cancelled => {
            tracing::debug!(%source, "query cancelled, no reply sent");
        }
    }
}
