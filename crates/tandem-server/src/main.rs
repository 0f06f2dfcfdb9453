//! Tandem server binary.
//!
//! # Usage
//!
//! ```bash
//! # Four-player session with three grabbable props
//! tandem-server --bind 0.0.0.0:7777 --max-participants 4 --props 3
//!
//! # Verbose logging
//! RUST_LOG=tandem_server=debug tandem-server
//! ```

use std::time::Duration;

use clap::Parser;
use tandem_server::{DriverConfig, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tandem session coordinator
#[derive(Parser, Debug)]
#[command(name = "tandem-server")]
#[command(about = "Coordinator for shared-object sessions")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:7777")]
    bind: String,

    /// Roster capacity
    #[arg(long, default_value = "8")]
    max_participants: usize,

    /// Participants required before the leader may start
    #[arg(long, default_value = "1")]
    min_participants: usize,

    /// Scene props to spawn at startup
    #[arg(long, default_value = "0")]
    props: u64,

    /// Replication tick in milliseconds
    #[arg(long, default_value = "50")]
    tick_ms: u64,

    /// Seconds of silence before a connection is dropped
    #[arg(long, default_value = "30")]
    idle_timeout_secs: u64,

    /// Frames buffered per connection for best-effort traffic
    #[arg(long, default_value = "256")]
    best_effort_queue: usize,

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

    tracing::info!(bind = %args.bind, props = args.props, "tandem server starting");

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        props: args.props,
        best_effort_queue_depth: args.best_effort_queue,
        driver: DriverConfig {
            max_participants: args.max_participants,
            min_participants: args.min_participants,
            tick_interval: Duration::from_millis(args.tick_ms),
            idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        },
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
