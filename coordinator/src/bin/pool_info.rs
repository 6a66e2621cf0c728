//! Joins a pool and prints the membership the server hands back.
//!
//! ```bash
//! RDV_SERVER_ADDRESS=node0 RDV_POOL_NAME=run42 RDV_POOL_SIZE=4 pool-info node3 rack-a
//! pool-info --config client.toml --pool run43 node3 rack-a
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rendezvous_core::{PoolClientConfig, PoolInfo, TcpTransport};

#[derive(Parser, Debug)]
#[command(name = "pool-info")]
#[command(about = "Join a rendezvous pool and print its members")]
struct Args {
    /// Host name this member reports
    host: String,

    /// Cluster name this member reports
    cluster: String,

    /// Client configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Rendezvous server address (host or host:port)
    #[arg(short, long)]
    server: Option<String>,

    /// Pool to join
    #[arg(long)]
    pool: Option<String>,

    /// Number of members in the pool
    #[arg(long)]
    size: Option<i32>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Validation happens on join, after every override has been applied.
    let mut config = match &args.config {
        Some(path) => std::fs::read_to_string(path)?.parse::<PoolClientConfig>()?,
        None => PoolClientConfig::default(),
    }
    .with_env_overrides();
    if let Some(server) = args.server {
        config.server_address = Some(server);
    }
    if let Some(pool) = args.pool {
        config.pool_name = Some(pool);
    }
    if let Some(size) = args.size {
        config.pool_size = size;
    }

    let info = PoolInfo::join(&TcpTransport::client(), &config, &args.host, &args.cluster).await?;
    eprint!("{info}");
    Ok(())
}
