//! Tether chat client.
//!
//! # Usage
//!
//! ```bash
//! # Talk to an in-process echo server
//! tether
//!
//! # Connect to a relay started with a self-signed certificate
//! tether --server 127.0.0.1:4433
//!
//! # Verify the relay against a CA
//! tether --server chat.example.com:4433 --server-name chat.example.com --ca-cert ca.pem
//! ```

mod error;

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use error::CliError;
use tether_client::{
    Connection, Session, SessionConfig, SessionOutcome, Terminal, memory,
    signal::Interrupts,
    transport::{self, Trust, TransportConfig},
};
use tokio::io::{AsyncWrite, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Capacity of each direction of the in-process echo connection.
const ECHO_CAPACITY: usize = 64;

/// How long the close may take to reach the relay before the process exits.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// Terminal chat client
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Line-oriented terminal chat over QUIC")]
#[command(version)]
struct Args {
    /// Relay address to connect to (host:port)
    ///
    /// If not provided, messages are echoed by an in-process server.
    #[arg(short, long)]
    server: Option<String>,

    /// Name the relay certificate must be valid for
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// CA certificate (PEM) to verify the relay against
    ///
    /// If not provided, any certificate is accepted (development only).
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Seconds to wait for the connection handshake
    #[arg(long, default_value_t = 60)]
    connect_timeout: u64,

    /// Seconds before an unsent message is abandoned
    #[arg(long, default_value_t = 5)]
    write_timeout: u64,

    /// Log level (trace, debug, info, warn, error, off)
    ///
    /// Logs go to stderr. Raise this for diagnostics; by default only
    /// internal failures are logged.
    #[arg(long, default_value = "error")]
    log_level: String,
}

impl Args {
    fn transport_config(&self) -> TransportConfig {
        let trust = match &self.ca_cert {
            Some(path) => Trust::CaFile(path.clone()),
            None => Trust::AnyCertificate,
        };

        TransportConfig {
            server_name: self.server_name.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            trust,
            ..TransportConfig::default()
        }
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            write_timeout: Duration::from_secs(self.write_timeout),
            ..SessionConfig::default()
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("{}", CliError::Runtime(e));
            return ExitCode::FAILURE;
        },
    };

    let code = runtime.block_on(async {
        let terminal = Terminal::new(tokio::io::stdout());
        match run(args, terminal.clone()).await {
            Ok(outcome) => exit_code(&outcome),
            Err(e) => {
                report(&terminal, &e).await;
                ExitCode::FAILURE
            },
        }
    });

    // Stdin reads block a runtime thread; do not wait for them.
    runtime.shutdown_background();

    code
}

async fn run<W>(args: Args, terminal: Terminal<W>) -> Result<SessionOutcome, CliError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let interrupts = Interrupts::register().map_err(CliError::Signals)?;
    let session_config = args.session_config();

    let outcome = match &args.server {
        Some(addr) => {
            tracing::info!("Connecting to {}", addr);
            let connection = transport::connect(addr, args.transport_config()).await?;
            let drain = connection.drain();
            let outcome = chat(connection, session_config, terminal, interrupts).await;
            if !drain.wait(CLOSE_LINGER).await {
                tracing::debug!("Close did not complete within {:?}", CLOSE_LINGER);
            }
            outcome
        },
        None => {
            tracing::info!("No server given, using in-process echo");
            chat(memory::spawn_echo(ECHO_CAPACITY), session_config, terminal, interrupts).await
        },
    };

    tracing::info!(?outcome, "session ended");
    Ok(outcome)
}

async fn chat<C, W>(
    connection: C,
    config: SessionConfig,
    terminal: Terminal<W>,
    interrupts: Interrupts,
) -> SessionOutcome
where
    C: Connection,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let input = BufReader::new(tokio::io::stdin());
    Session::new(connection, config).run(input, terminal, interrupts.recv()).await
}

async fn report<W>(terminal: &Terminal<W>, error: &CliError)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    match error {
        CliError::Connect(e) => {
            tracing::debug!("{}", error);
            if let Err(write_err) =
                terminal.line(&format!("Failed to connect to chat server: {e}")).await
            {
                tracing::debug!("Failed to print connect notice: {write_err}");
            }
        },
        CliError::Runtime(_) | CliError::Signals(_) => tracing::error!("{}", error),
    }
}

fn exit_code(outcome: &SessionOutcome) -> ExitCode {
    if outcome.is_failure() { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}
