//! Duet server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory storage, self-signed certificate (development)
//! duet-server --bind 127.0.0.1:4433
//!
//! # Persistent storage with a real certificate
//! duet-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem --data-dir /var/lib/duet
//! ```

use std::path::PathBuf;

use clap::Parser;
use duet_server::{
    ConversationStore, HubConfig, MemoryStore, RedbStore, Server, ServerError, ServerRuntimeConfig,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// File name of the database inside `--data-dir`.
const DATABASE_FILE: &str = "duet.redb";

/// Duet two-party messaging hub
#[derive(Parser, Debug)]
#[command(name = "duet-server")]
#[command(about = "Two-party real-time messaging hub over QUIC")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<PathBuf>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Directory for persistent storage; messages are kept in memory if unset
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Maximum concurrent connections
    #[arg(long, default_value_t = duet_server::hub::DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Longest accepted message, in characters
    #[arg(long, default_value_t = duet_server::hub::DEFAULT_MAX_MESSAGE_LENGTH)]
    max_message_length: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(bind = %args.bind, "duet server starting");

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        data_dir: args.data_dir,
        hub: HubConfig {
            max_connections: args.max_connections,
            max_message_length: args.max_message_length,
        },
        ..Default::default()
    };

    match config.data_dir.clone() {
        Some(dir) => {
            std::fs::create_dir_all(&dir).map_err(|e| {
                ServerError::Config(format!("cannot create data dir '{}': {e}", dir.display()))
            })?;
            let path = dir.join(DATABASE_FILE);
            tracing::info!(path = %path.display(), "using redb storage");
            serve(config, RedbStore::open(&path)?).await?;
        },
        None => {
            tracing::warn!("no --data-dir given, messages will not survive a restart");
            serve(config, MemoryStore::new()).await?;
        },
    }

    Ok(())
}

async fn serve<S: ConversationStore>(
    config: ServerRuntimeConfig,
    store: S,
) -> Result<(), ServerError> {
    let server = Server::bind(config, store)?;
    tracing::info!(addr = %server.local_addr()?, "listening");

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        },
    }
}
