//! Typed errors for the tunnel's components, one small enum per module: a
//! `derive_more`-derived enum wrapping the lower-level error it originated
//! from, no `anyhow`/`thiserror`.
//!
//! `ConfigError` and `SessionError` each wrap two different non-string
//! sources but also carry a couple of plain `String` variants for
//! caller-built messages, so their `From` impls are written by hand here
//! instead of derived: `derive_more`'s blanket `#[derive(From)]` would try
//! to generate two conflicting `impl From<String>`s for the same enum.

use derive_more::{Display, Error, From};

/// Errors that abort startup: invalid configuration or an unreachable
/// tunnel server.
#[derive(Debug, Display, Error)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    MissingField(String),
    InvalidEndpoint(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Errors from the client's upstream WebSocket session.
#[derive(Debug, Display, Error)]
pub enum SessionError {
    Io(std::io::Error),
    WebSocket(tokio_tungstenite::tungstenite::Error),
    HandshakeClosed,
    ConnectTimeout(String),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::WebSocket(e)
    }
}

/// Errors from the server's per-session query forwarder. None of these
/// are fatal to the session; the caller logs and drops the one query.
#[derive(Debug, Display, From, Error)]
pub enum ForwarderError {
    Io(std::io::Error),
    Frame(crate::proto::FrameError),
    UpstreamTimeout,
}
