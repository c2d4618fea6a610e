//! stcp command line.
//!
//! ```text
//! stcp serve --cert cert.pem --key key.pem          # TLS echo server
//! stcp send 127.0.0.1:8443 "ping" --insecure        # one request, one response
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use stcp::config::validation::validate_config;
use stcp::config::{load_config, ClientModeConfig, StcpConfig};
use stcp::lifecycle::signals::shutdown_signal;
use stcp::{Client, Connection, Error, Server, MAX_RESPONSE_BYTES};

#[derive(Parser)]
#[command(name = "stcp")]
#[command(about = "Single-shot TCP/TLS client and TLS echo server", long_about = None)]
struct Cli {
    /// TOML configuration file. Flags override its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a TLS echo server
    Serve(ServeArgs),
    /// Send one message and print the response
    Send(SendArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,
    #[arg(long)]
    cert: Option<PathBuf>,
    #[arg(long)]
    key: Option<PathBuf>,
    #[arg(long)]
    max_connections: Option<usize>,
}

#[derive(Args)]
struct SendArgs {
    /// Remote host:port
    address: String,
    message: String,
    /// Skip server certificate verification (insecure)
    #[arg(long, conflicts_with_all = ["plain", "cert"])]
    insecure: bool,
    /// Raw TCP instead of TLS
    #[arg(long, conflicts_with = "cert")]
    plain: bool,
    /// Plain mode deadline in seconds
    #[arg(long, requires = "plain")]
    deadline_secs: Option<u64>,
    /// Client certificate (mutual TLS)
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,
    /// CA bundle used to verify the server (mutual TLS)
    #[arg(long, requires = "cert")]
    ca: Option<PathBuf>,
    #[arg(long)]
    server_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => StcpConfig::default(),
    };

    stcp::observability::logging::init(&config.logging.filter)?;

    match cli.command {
        Commands::Serve(args) => {
            apply_serve_args(&mut config, args);
            validate(&config)?;
            serve(config).await
        }
        Commands::Send(args) => {
            let message = apply_send_args(&mut config, args);
            validate(&config)?;
            send(config, &message).await
        }
    }
}

fn apply_serve_args(config: &mut StcpConfig, args: ServeArgs) {
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(cert) = args.cert {
        config.server.tls.cert_path = cert;
    }
    if let Some(key) = args.key {
        config.server.tls.key_path = key;
    }
    if args.max_connections.is_some() {
        config.server.max_connections = args.max_connections;
    }
}

/// Returns the message to send.
fn apply_send_args(config: &mut StcpConfig, args: SendArgs) -> String {
    config.client.address = args.address;

    if args.insecure {
        config.client.mode = ClientModeConfig::InsecureTls;
    } else if args.plain {
        config.client.mode = ClientModeConfig::Plain {
            deadline_secs: args.deadline_secs,
        };
    } else if let (Some(cert_path), Some(key_path)) = (args.cert, args.key) {
        config.client.mode = ClientModeConfig::MutualTls {
            cert_path,
            key_path,
            ca_path: args.ca,
        };
    }

    if args.server_name.is_some() {
        config.client.server_name = args.server_name;
    }
    args.message
}

fn validate(config: &StcpConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(errors) = validate_config(config) {
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(format!("invalid configuration: {}", joined).into());
    }
    Ok(())
}

async fn serve(config: StcpConfig) -> Result<(), Box<dyn std::error::Error>> {
    let server = Arc::new(Server::bind(&config.server.to_options()).await?);

    tracing::info!(address = %server.local_addr(), "stcp echo server ready");

    let closer = Arc::clone(&server);
    tokio::spawn(async move {
        shutdown_signal().await;
        if let Err(e) = closer.close() {
            tracing::warn!(error = %e, "Close failed");
        }
    });

    match server.serve(echo).await {
        // The signal arrived before the accept loop started.
        Err(Error::Closed) => tracing::info!("Closed before serving"),
        other => other?,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Echo every read back until the peer hangs up.
async fn echo(mut conn: Connection) {
    let mut buf = vec![0u8; MAX_RESPONSE_BYTES];
    loop {
        match conn.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = conn.write_all(&buf[..n]).await {
                    tracing::debug!(connection_id = %conn.id(), error = %e, "Echo write failed");
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(connection_id = %conn.id(), error = %e, "Echo read failed");
                return;
            }
        }
    }
    let _ = conn.shutdown().await;
}

async fn send(config: StcpConfig, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect(&config.client.address, config.client.to_options()).await?;
    let response = client.write_str(message).await?;
    println!("{}", response);
    client.close().await?;
    Ok(())
}
