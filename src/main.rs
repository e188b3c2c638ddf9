use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use floodgate::config::FloodgateConfig;
use floodgate::http::HttpServer;
use floodgate::ratelimit::{spawn_sweeper, RateLimiter};

/// Token-bucket rate limited HTTP endpoint.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    info!("Starting Floodgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = FloodgateConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.http_addr = listen;
    }

    // Any invalid setting stops startup here, before the socket is bound.
    let limiter_config = config.rate_limiting.limiter_config()?;
    let sweep_interval = config.rate_limiting.sweep_interval()?;
    let extractor = config.rate_limiting.key_extractor()?;
    info!(
        http_addr = %config.server.http_addr,
        capacity = limiter_config.capacity,
        refill_rate_per_second = limiter_config.refill_rate_per_second,
        key_ttl_secs = limiter_config.key_ttl.as_secs_f64(),
        cost_per_request = limiter_config.cost_per_request,
        key_strategy = ?config.rate_limiting.key_strategy,
        "Configuration loaded"
    );

    let rate_limiter = Arc::new(RateLimiter::new(limiter_config)?);
    let sweeper = spawn_sweeper(Arc::clone(&rate_limiter), sweep_interval);
    info!("Rate limiter initialized");

    let server = HttpServer::new(config.server.http_addr, Arc::clone(&rate_limiter), extractor);

    // Run the server with graceful shutdown on Ctrl+C
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    sweeper.shutdown().await;
    let stats = rate_limiter.stats();
    info!(
        checks = stats.checks,
        admitted = stats.admitted,
        rejected = stats.rejected,
        buckets = rate_limiter.bucket_count(),
        "Floodgate stopped"
    );

    served?;
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
