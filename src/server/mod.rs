//! Server-side WebSocket Acceptor & Authenticator, wired to the
//! [`SessionRegistry`] and the per-frame [`forwarder`].
//!
//! Built directly on `tokio_tungstenite`'s server-side `accept_async`,
//! symmetric with the client's `connect_async` in `client/session.rs`,
//! rather than through an HTTP framework: the accept and auth-receive
//! deadlines are simplest to enforce as two consecutive
//! `tokio::time::timeout` calls wrapping raw WebSocket operations, and
//! both sides of the tunnel end up sharing one WebSocket crate instead of
//! two. (See `DESIGN.md` for why this drops the `axum` dependency.)

pub mod forwarder;
pub mod registry;

use std::borrow::Cow;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::config::ServerConfig;
use crate::proto::{decode_frame, encode_frame};
use crate::shutdown::ShutdownHandle;
use registry::SessionRegistry;

const ACCEPT_DEADLINE: Duration = Duration::from_secs(1);
const AUTH_DEADLINE: Duration = Duration::from_secs(1);
const CLOSE_DEADLINE: Duration = Duration::from_secs(1);

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsStream = WebSocketStream<TcpStream>;
type WsWrite = futures_util::stream::SplitSink<WsStream, Message>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

/// Bind every configured URL and accept connections until `shutdown` fires.
pub async fn run(config: ServerConfig, shutdown: Arc<ShutdownHandle>) -> Result<(), BoxError> {
    let resolver = config.parsed_resolver()?;
    let urls = config.parsed_urls()?;
    let tokens: Arc<HashSet<String>> = Arc::new(config.auth_token.iter().cloned().collect());
    let registry = Arc::new(SessionRegistry::new());

    let mut listeners = Vec::with_capacity(urls.len());
    for bind in &urls {
        listeners.push(TcpListener::bind(bind).await?);
    }

    let mut tasks = Vec::with_capacity(listeners.len());
    for listener in listeners {
        let tokens = tokens.clone();
        let registry = registry.clone();
        let shutdown = shutdown.as_ref().clone();
        tasks.push(tokio::spawn(accept_loop(listener, tokens, registry, resolver, shutdown)));
    }

    shutdown.cancelled().await;
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    tokens: Arc<HashSet<String>>,
    registry: Arc<SessionRegistry>,
    resolver: SocketAddr,
    shutdown: ShutdownHandle,
) {
    let local_addr = listener.local_addr().ok();
    tracing::info!(?local_addr, "WebSocket acceptor listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(?local_addr, "acceptor cancelled");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let tokens = tokens.clone();
                        let registry = registry.clone();
                        let session_shutdown = shutdown.child();
                        tokio::spawn(accept_one(stream, peer, tokens, registry, resolver, session_shutdown));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "transient TCP accept error");
                    }
                }
            }
        }
    }
}

/// Test seam: drive a single raw connection through the accept/auth
/// handshake without standing up a whole acceptor loop.
#[doc(hidden)]
pub async fn accept_one_for_tests(
    stream: TcpStream,
    peer: SocketAddr,
    tokens: Arc<HashSet<String>>,
    registry: Arc<SessionRegistry>,
    resolver: SocketAddr,
    shutdown: ShutdownHandle,
) {
    accept_one(stream, peer, tokens, registry, resolver, shutdown).await
}

/// Drive one connection through the handshake and authentication deadlines,
/// then hand it to [`run_session`] once a valid token has been received.
async fn accept_one(
    stream: TcpStream,
    peer: SocketAddr,
    tokens: Arc<HashSet<String>>,
    registry: Arc<SessionRegistry>,
    resolver: SocketAddr,
    shutdown: ShutdownHandle,
) {
    let ws = match tokio::time::timeout(ACCEPT_DEADLINE, tokio_tungstenite::accept_async(stream)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::debug!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
        Err(_) => {
            tracing::debug!(%peer, "WebSocket handshake did not complete within the deadline");
            return;
        }
    };

    let (mut write, mut read) = ws.split();

    let token = match tokio::time::timeout(AUTH_DEADLINE, read.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text.to_string(),
        Ok(Some(Ok(_))) => {
            tracing::warn!(%peer, "first frame was not the auth token");
            close_with(&mut write, CloseCode::Protocol, "first frame must be the auth token").await;
            return;
        }
        Ok(Some(Err(e))) => {
            tracing::debug!(%peer, error = %e, "transport error awaiting auth frame");
            return;
        }
        Ok(None) => {
            tracing::debug!(%peer, "connection closed before sending an auth token");
            return;
        }
        Err(_) => {
            tracing::debug!(%peer, "auth frame did not arrive within the deadline");
            close_with(&mut write, CloseCode::Policy, "authentication timed out").await;
            return;
        }
    };

    if !tokens.contains(&token) {
        tracing::warn!(%peer, "rejected connection with an unknown auth token");
        close_with(&mut write, CloseCode::Policy, "unknown auth token").await;
        return;
    }

    tracing::info!(%peer, "session authenticated");
    run_session(write, read, token, registry, resolver, shutdown).await;
}

async fn close_with(write: &mut WsWrite, code: CloseCode, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    };
    let _ = tokio::time::timeout(CLOSE_DEADLINE, write.send(Message::Close(Some(frame)))).await;
}

/// The single task owning both halves of one authenticated session: reads
/// inbound frames and spawns a forwarder per query, writes outbound
/// frames serialized through one `mpsc` channel, and tears down its
/// registry entry on exit. Mirrors the client's `session::run` loop.
async fn run_session(
    mut write: WsWrite,
    mut read: WsRead,
    token: String,
    registry: Arc<SessionRegistry>,
    resolver: SocketAddr,
    shutdown: ShutdownHandle,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let generation = registry.register(token.clone(), outbound_tx.clone(), shutdown.clone());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(%token, "session cancelled");
                break;
            }
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Binary(bytes))) => {
                        match decode_frame(&bytes) {
                            Ok((id, payload)) => {
                                let payload = payload.to_vec();
                                let outbound_tx = outbound_tx.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = forwarder::forward(id, payload, resolver, outbound_tx).await {
                                        tracing::debug!(error = %e, "dropped one query");
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "malformed frame from client, dropping");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(%token, "session closed by client");
                        break;
                    }
                    Some(Ok(other)) => {
                        tracing::warn!(kind = ?other, "non-binary frame from client, ending session");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "session transport error");
                        break;
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some((id, payload)) => {
                        let frame = encode_frame(id, &payload);
                        if let Err(e) = write.send(Message::Binary(frame.into())).await {
                            tracing::warn!(error = %e, "failed to write frame to client");
                            break;
                        }
                    }
                    None => {
                        tracing::debug!(%token, "outbound channel closed");
                        break;
                    }
                }
            }
        }
    }

    registry.dispose(&token, generation);
    close_with(&mut write, CloseCode::Normal, "session ended").await;
}
