use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::http::{build_router, HttpServer, IdentityResolver};
use turnstile::ratelimit::{Clock, CounterStore, SegmentTable, Sweeper, SystemClock};

/// Rate-limiting HTTP gateway.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about = "Fixed-window admission control gateway")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => TurnstileConfig::from_file(path)?,
        None => {
            warn!("No configuration file given, using defaults");
            TurnstileConfig::default()
        }
    };
    info!(
        http_addr = %config.server.http_addr,
        segments = config.rate_limiting.segments.len(),
        trusted_proxies = config.server.trusted_proxies.len(),
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = CounterStore::new();
    let segments = Arc::new(SegmentTable::build(
        &config.rate_limiting.segments,
        &store,
        Arc::clone(&clock),
    )?);

    for (segment, limiter) in segments.iter() {
        info!(
            segment = %segment,
            max_hits = limiter.policy().max_hits,
            window_ms = limiter.policy().window_ms,
            "Protecting /api/{}", segment
        );
    }

    let sweeper = Sweeper::spawn(
        store.clone(),
        clock,
        Duration::from_millis(config.rate_limiting.sweep_interval_ms),
    )?;

    let identity = IdentityResolver::new(config.server.trusted_proxies.clone());
    let router = build_router(segments, store, identity);
    let server = HttpServer::bind(config.server.http_addr, router).await?;

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.shutdown().await;
    info!("Turnstile stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
