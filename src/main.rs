use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bucketgate::config::{GatewayConfig, LoggingConfig};
use bucketgate::http::{router, AppState, HttpServer};
use bucketgate::janitor::Janitor;
use bucketgate::ratelimit::RateLimiter;
use bucketgate::{objects, store};

#[derive(Parser, Debug)]
#[command(name = "bucketgate")]
#[command(about = "Rate-limited edge gateway for a blob bucket")]
struct Args {
    /// YAML configuration file; environment variables prefixed BUCKETGATE override it
    #[arg(short, long, env = "BUCKETGATE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = GatewayConfig::load(args.config.as_deref())?;

    init_tracing(&config.logging);

    info!("Starting Bucketgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        burst_limit = config.rate_limiting.burst_limit,
        sustained_limit = config.rate_limiting.sustained_limit,
        failure_policy = ?config.rate_limiting.failure_policy,
        "Configuration loaded"
    );

    let grace = Duration::from_secs(config.janitor.counter_grace_secs);
    let counters = store::connect(&config.counters, grace).await?;
    let (bucket, expiries) = objects::open(&config.storage).await?;

    let limiter = Arc::new(RateLimiter::new(counters.clone(), &config.rate_limiting));
    let janitor = Arc::new(Janitor::new(
        bucket.clone(),
        expiries.clone(),
        counters,
        &config.janitor,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let janitor_task = if config.janitor.enabled {
        Some(janitor.clone().spawn(
            Duration::from_secs(config.janitor.interval_secs),
            shutdown_rx,
        ))
    } else {
        info!("Timer-driven janitor disabled");
        None
    };

    let state = Arc::new(AppState::new(&config, limiter, bucket, expiries, janitor));
    let app = router(state, &config.server);

    HttpServer::new(config.server.listen_addr, app)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = janitor_task {
        if let Err(e) = task.await {
            warn!(error = %e, "Janitor task ended abnormally");
        }
    }

    info!("Bucketgate stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter.as_str()));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
