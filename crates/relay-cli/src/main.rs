use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relay_core::transport::{Router, StreamDealer, StreamRouter};
use relay_core::Directory;
use relay_node::coordinator::DEFAULT_COORDINATOR_PORT;
use relay_node::Coordinator;
use tracing_subscriber::EnvFilter;

/// Launch a standalone Coordinator, the router hub every Component and
/// federated peer Coordinator connects to.
#[derive(Parser, Debug)]
#[command(name = "relay-coordinator")]
#[command(about = "Run a control-plane routing Coordinator")]
struct Args {
    /// Namespace this Coordinator answers for.
    #[arg(long, default_value = "N1")]
    namespace: String,

    /// Host to bind the router on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the router on.
    #[arg(long, default_value_t = DEFAULT_COORDINATOR_PORT)]
    port: u16,

    /// Comma-separated "host:port" addresses of peer Coordinators to dial
    /// on startup.
    #[arg(long, value_delimiter = ',')]
    coordinators: Vec<String>,

    /// Seconds between expiration sweeps of stale components/peers.
    #[arg(long, default_value_t = 5.0)]
    cleaning_interval: f64,

    /// Seconds of silence before a component or peer is considered expired.
    #[arg(long, default_value_t = 15.0)]
    expiration_time: f64,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log verbosity.
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet {
        "warn"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;
    rt.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let bind_addr = format!("{}:{}", args.host, args.port);
    let router = StreamRouter::bind(&bind_addr).await.with_context(|| format!("binding router on {bind_addr}"))?;
    let address = Directory::normalize_address(&bind_addr, DEFAULT_COORDINATOR_PORT);

    let mut coordinator = Coordinator::new(&args.namespace, address, Router::Stream(router));
    tracing::info!(namespace = %args.namespace, %bind_addr, "coordinator listening");

    for peer_addr in &args.coordinators {
        let normalized = Directory::normalize_address(peer_addr, DEFAULT_COORDINATOR_PORT);
        match StreamDealer::connect(&normalized).await {
            Ok(dealer) => {
                if let Err(e) = coordinator
                    .connect_to_coordinator(&normalized, relay_core::transport::Dealer::Stream(dealer))
                    .await
                {
                    tracing::warn!(peer = %normalized, error = %e, "coordinator_sign_in failed");
                }
            }
            Err(e) => tracing::warn!(peer = %normalized, error = %e, "failed to connect to peer coordinator"),
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
        stop_for_signal.store(true, std::sync::atomic::Ordering::Relaxed);
    });

    coordinator
        .run(
            stop,
            Duration::from_millis(200),
            Duration::from_secs_f64(args.cleaning_interval),
            Duration::from_secs_f64(args.expiration_time),
        )
        .await;

    Ok(())
}
