//! DNS tunnel
//!
//! An encrypted tunnel for DNS traffic, carried as a single authenticated
//! WebSocket connection between a client and a relay server.
//!
//! # Architecture
//!
//! * `proto` - the wire framing shared by both sides
//! * `pending` - the client's correlation-id arena for in-flight queries
//! * `config` - typed TOML configuration for both binaries
//! * `logging` - shared tracing setup
//! * `shutdown` - composite cancellation handle
//! * `errors` - per-module error types
//! * `client` - UDP Listener Pool and Upstream Session
//! * `server` - WebSocket Acceptor/Authenticator, Session Registry, Query Forwarder

pub mod client;
pub mod config;
pub mod errors;
pub mod logging;
pub mod pending;
pub mod proto;
pub mod server;
pub mod shutdown;
