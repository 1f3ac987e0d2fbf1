//! The client's single authenticated WebSocket connection to the tunnel
//! server: dials, authenticates, and demultiplexes framed responses back to
//! the [`PendingTable`] while serializing outbound frames through one
//! writer.
//!
//! A single task owns both halves of the split WebSocket stream and
//! `select!`s between inbound frames and an outbound channel, so writes are
//! never interleaved across callers.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::errors::SessionError;
use crate::pending::{Outcome, PendingTable};
use crate::proto::{decode_frame, encode_frame};
use crate::shutdown::ShutdownHandle;

/// Deadline for the best-effort graceful close on teardown; independent of
/// the service cancellation token so a close frame still gets a chance to
/// flush while the rest of the process is shutting down.
const CLOSE_DEADLINE: Duration = Duration::from_secs(1);

/// The client's single upstream session. Cheap to clone (an `Arc` inside);
/// every UDP listener task shares one instance.
#[derive(Clone)]
pub struct UpstreamSession {
    outbound: mpsc::UnboundedSender<(u32, Vec<u8>)>,
    pending: std::sync::Arc<PendingTable>,
}

impl UpstreamSession {
    /// Dial `resolver_uri`, send the auth token as the mandatory first TEXT
    /// message, and spawn the task that owns the connection for its
    /// lifetime.
    pub async fn connect(
        resolver_uri: &str,
        auth_token: &str,
        shutdown: ShutdownHandle,
    ) -> Result<Self, SessionError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(resolver_uri).await?;
        let (mut write, read) = ws_stream.split();

        write.send(Message::Text(auth_token.to_string().into())).await?;

        let pending = std::sync::Arc::new(PendingTable::new());
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run(write, read, outbound_rx, pending.clone(), shutdown));

        Ok(Self {
            outbound: outbound_tx,
            pending,
        })
    }

    /// Register a pending slot for `source`, write the framed query, and
    /// wait (bounded by the 1-second per-query deadline) for the matching
    /// response.
    pub async fn query(&self, source: SocketAddr, payload: Vec<u8>) -> Outcome {
        let reg = self.pending.register(source);
        let id = reg.id;
        if self.outbound.send((id, payload)).is_err() {
            // Writer task already gone; the slot was never written to the
            // wire so there is nothing to wait for.
            self.pending.expire(id);
            return Outcome::Cancelled;
        }
        reg.wait(&self.pending).await
    }
}

async fn run(
    mut write: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >,
    mut read: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    >,
    mut outbound_rx: mpsc::UnboundedReceiver<(u32, Vec<u8>)>,
    pending: std::sync::Arc<PendingTable>,
    shutdown: ShutdownHandle,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("upstream session cancelled");
                break;
            }
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Binary(bytes))) => {
                        match decode_frame(&bytes) {
                            Ok((id, payload)) => pending.complete(id, payload.to_vec()),
                            Err(e) => {
                                tracing::warn!(error = %e, "malformed frame from server, dropping");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("upstream session closed by server");
                        break;
                    }
                    Some(Ok(other)) => {
                        tracing::warn!(kind = ?other, "non-binary frame from server, ending session");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "upstream session transport error");
                        break;
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some((id, payload)) => {
                        let frame = encode_frame(id, &payload);
                        if let Err(e) = write.send(Message::Binary(frame.into())).await {
                            tracing::warn!(error = %e, "failed to write frame upstream");
                            break;
                        }
                    }
                    None => {
                        tracing::debug!("upstream session handle dropped");
                        break;
                    }
                }
            }
        }
    }

    pending.cancel_all();
    shutdown.cancel();

    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: Cow::Borrowed("session ended"),
    };
    let _ = tokio::time::timeout(CLOSE_DEADLINE, write.send(Message::Close(Some(frame)))).await;
}
