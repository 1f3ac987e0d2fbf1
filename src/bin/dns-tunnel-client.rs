//! DNS tunnel client
//!
//! Accepts plain UDP DNS datagrams on one or more loopback endpoints and
//! forwards them over a single authenticated WebSocket connection to a
//! tunnel server.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use dns_tunnel::config::ClientConfig;
use dns_tunnel::logging;

/// DNS tunnel client - relay local UDP DNS queries over an encrypted WebSocket
#[derive(Parser)]
#[command(name = "dns-tunnel-client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relay local UDP DNS queries to a dns-tunnel-server", long_about = None)]
struct Cli {
    /// Path to the client TOML configuration file
    #[arg(short, long, env = "DNS_TUNNEL_CONFIG", default_value = "client.toml")]
    config: PathBuf,

    /// Issue one self-test query and exit instead of running the service
    #[arg(long)]
    test: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ClientConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = logging::init(config.log_level, config.log_file.as_deref());

    match dns_tunnel::client::run(config, cli.test).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "client exited with an error");
            ExitCode::FAILURE
        }
    }
}
