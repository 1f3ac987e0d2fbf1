//! Client-side daemon: UDP Listener Pool plus the single Upstream Session.

pub mod listener;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::shutdown::ShutdownHandle;
use session::UpstreamSession;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Start the client: dial the upstream session, launch the UDP listener
/// pool, and (when `test` is set) issue one self-test query before
/// returning.
pub async fn run(config: ClientConfig, test: bool) -> Result<(), BoxError> {
    let binds = config.parsed_end_points()?;
    let shutdown = Arc::new(ShutdownHandle::new());
    shutdown.install_signal_handlers();

    let session = UpstreamSession::connect(&config.resolver, &config.resolver_auth_token, shutdown.as_ref().clone()).await?;

    let pool_shutdown = shutdown.as_ref().clone();
    let pool_session = session.clone();
    let pool_binds = binds.clone();
    let pool_handle = tokio::spawn(listener::run_pool(pool_binds, pool_session, pool_shutdown));

    if test {
        run_self_test(&binds[0]).await?;
        shutdown.cancel();
    }

    shutdown.cancelled().await;
    let _ = pool_handle.await;
    Ok(())
}

/// Issue one DNS `A` query for a well-known hostname against the client's
/// own local endpoint, per the process-level `test` flag in the external
/// interfaces. This assembles a minimal, fixed-shape query packet directly
/// rather than pulling in a DNS parser: the tunnel is transparent to DNS
/// payloads, and this utility only needs to produce one, not parse one.
async fn run_self_test(endpoint: &std::net::SocketAddr) -> Result<(), BoxError> {
    let probe = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    let query = build_a_query("example.com");

    probe.send_to(&query, endpoint).await?;

    let mut buf = vec![0u8; 512];
    match tokio::time::timeout(Duration::from_secs(1), probe.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => {
            tracing::info!(bytes = len, "self-test query answered");
            Ok(())
        }
        Ok(Err(e)) => Err(Box::new(e)),
        Err(_) => {
            tracing::warn!("self-test query timed out");
            Ok(())
        }
    }
}

/// Assemble a minimal standard DNS query for an `A` record.
fn build_a_query(name: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(12 + name.len() + 2 + 5);
    packet.extend_from_slice(&0x1234u16.to_be_bytes()); // id
    packet.extend_from_slice(&0x0100u16.to_be_bytes()); // flags: recursion desired
    packet.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    packet.extend_from_slice(&0u16.to_be_bytes()); // ancount
    packet.extend_from_slice(&0u16.to_be_bytes()); // nscount
    packet.extend_from_slice(&0u16.to_be_bytes()); // arcount

    for label in name.split('.') {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0); // root label

    packet.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
    packet.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN
    packet
}
