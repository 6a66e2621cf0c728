//! Rendezvous Server
//!
//! Hosts the pool coordination service. Members of a closed-world run
//! join a named pool here and learn each other's identity once the pool
//! is complete.
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings (base port 8888)
//! rendezvous-server
//!
//! # Custom port, log every pool event
//! rendezvous-server --port 9000 --events
//!
//! # Start with configuration file
//! rendezvous-server --config server.toml
//!
//! # Controlled by a parent process over stdin/stdout
//! rendezvous-server --remote --framing line
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rendezvous_core::remote::server_framing;
use rendezvous_core::{Framing, RemoteHandler, ServerConfig, ServiceHost, TcpTransport};
use rendezvous_server::default_registry;

/// Rendezvous server
#[derive(Parser, Debug)]
#[command(name = "rendezvous-server")]
#[command(about = "Rendezvous server for closed-world application runs")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Base port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind to
    #[arg(short, long)]
    bind: Option<String>,

    /// Host name to advertise as the server address
    #[arg(long)]
    advertised_host: Option<String>,

    /// Hub addresses known at startup (comma separated)
    #[arg(long, value_delimiter = ',')]
    hub_addresses: Vec<String>,

    /// Serve the remote-control protocol on stdin/stdout
    #[arg(long)]
    remote: bool,

    /// Remote-control framing (binary, line)
    #[arg(long)]
    framing: Option<Framing>,

    /// Log every pool join and release
    #[arg(long)]
    events: bool,

    /// Log full error chains
    #[arg(long)]
    errors: bool,

    /// Log service statistics every N seconds
    #[arg(long, value_name = "SECS")]
    stats: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Only log warnings and errors
    #[arg(long, conflicts_with = "debug")]
    warn: bool,

    /// Log debug output
    #[arg(long)]
    debug: bool,
}

impl Args {
    /// Configuration file (if any), then environment, then command line.
    fn load_config(&self) -> rendezvous_core::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        }
        .with_env_overrides();

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = &self.bind {
            config.server.bind_host = bind.clone();
        }
        if let Some(host) = &self.advertised_host {
            config.server.advertised_host = Some(host.clone());
        }
        config
            .server
            .hub_addresses
            .extend(self.hub_addresses.iter().map(|h| h.trim().to_string()));
        if let Some(framing) = self.framing {
            config.remote.framing = framing;
        }

        if self.events {
            config.logging.events = true;
        }
        if self.errors {
            config.logging.errors = true;
        }
        if let Some(secs) = self.stats {
            config.logging.stats_interval_secs = secs;
        }
        if self.warn {
            config.logging.level = "warn".to_string();
        }
        if self.debug {
            config.logging.level = "debug".to_string();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = args.load_config()?;

    // Initialize logging. Stdout may carry the remote-control stream.
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&config.logging.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let transport = Arc::new(TcpTransport::from_config(&config));
    let host = ServiceHost::start(&config, transport, &default_registry()).await;
    if host.service_names().is_empty() {
        tracing::warn!("no services could be started");
    }

    let session = if args.remote {
        tracing::info!("{host}");
        tracing::info!(
            framing = ?config.remote.framing,
            "accepting remote control on stdin/stdout"
        );
        let handler = RemoteHandler::new(host.clone());
        let framing =
            server_framing(config.remote.framing, tokio::io::stdin(), tokio::io::stdout());
        Some(tokio::spawn(async move {
            let exit = handler.run(framing).await;
            tracing::debug!(?exit, "remote control session finished");
        }))
    } else {
        println!("{host}");
        None
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "could not listen for interrupt");
            }
            tracing::info!("interrupted, shutting down");
        }
        _ = host.shutdown_requested() => {}
    }
    host.shutdown(Duration::ZERO).await;

    if let Some(session) = session {
        // Let the session deliver its END reply before the process exits.
        let _ = tokio::time::timeout(Duration::from_secs(1), session).await;
        // The stdin reader thread cannot be cancelled and would keep the
        // runtime from shutting down.
        std::process::exit(0);
    }
    Ok(())
}
