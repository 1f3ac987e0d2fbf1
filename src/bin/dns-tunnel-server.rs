//! DNS tunnel server
//!
//! Accepts authenticated WebSocket connections and relays the DNS queries
//! they carry to a configured upstream resolver over UDP.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dns_tunnel::config::ServerConfig;
use dns_tunnel::logging;
use dns_tunnel::shutdown::ShutdownHandle;

/// DNS tunnel server - relay DNS queries received over an encrypted WebSocket
#[derive(Parser)]
#[command(name = "dns-tunnel-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relay WebSocket-tunneled DNS queries to an upstream resolver", long_about = None)]
struct Cli {
    /// Path to the server TOML configuration file
    #[arg(short, long, env = "DNS_TUNNEL_CONFIG", default_value = "server.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ServerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = logging::init(config.log_level, config.log_file.as_deref());

    let shutdown = Arc::new(ShutdownHandle::new());
    shutdown.install_signal_handlers();

    match dns_tunnel::server::run(config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server exited with an error");
            ExitCode::FAILURE
        }
    }
}
