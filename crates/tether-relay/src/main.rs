//! Tether relay binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate (development)
//! tether-relay --bind 127.0.0.1:4433
//!
//! # Start with TLS certificate
//! tether-relay --bind 0.0.0.0:4433 --cert cert.pem --key key.pem
//! ```

use clap::Parser;
use tether_relay::{Relay, RelayConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tether chat relay
#[derive(Parser, Debug)]
#[command(name = "tether-relay")]
#[command(about = "Broadcast relay for the Tether chat client")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long, requires = "key")]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long, requires = "cert")]
    key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    tracing::info!("Tether relay starting");

    if args.cert.is_none() {
        tracing::warn!("No TLS certificate provided - clients must connect in development mode");
    }

    let config = RelayConfig { bind_address: args.bind, cert_path: args.cert, key_path: args.key };

    let relay = Relay::bind(config)?;

    tracing::info!("Relay listening on {}", relay.local_addr()?);

    relay
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn cert_requires_key() {
        let result = Args::try_parse_from(["tether-relay", "--cert", "cert.pem"]);
        assert!(result.is_err());
    }

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["tether-relay"]).unwrap();
        assert_eq!(args.bind, "127.0.0.1:4433");
        assert_eq!(args.log_level, "info");
    }
}
