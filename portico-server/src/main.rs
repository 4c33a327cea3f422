// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Portico: programmable HTTP/WebSocket edge gateway
//
//  Data plane:    axum pipeline (shell → CORS → limit → relay)
//  Control plane: REST + SSE under the configured base path
//  Persistence:   etcd-backed KV (optional)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::Parser;
use portico_core::config::KeyBy;
use portico_core::GatewayConfig;
use portico_observability::{Snapshotter, SNAPSHOT_INTERVAL_MS};
use portico_proxy::Gateway;
use portico_store::{EtcdStore, KvAdapter};
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Idle-bucket sweep cadence.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "portico", version, about = "Portico edge gateway")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Portico starting");

    let config = GatewayConfig::load(cli.config.as_deref())?;

    // ── KV store (optional) ──
    let kv = if config.etcd_enabled() {
        match EtcdStore::connect(&config.etcd.endpoints, &config.etcd.prefix).await {
            Ok(store) => KvAdapter::new(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "etcd unreachable, running without persistence");
                KvAdapter::disabled()
            }
        }
    } else {
        info!("No etcd endpoints configured, running without persistence");
        KvAdapter::disabled()
    };

    // ── Gateway ──
    // The worker pool executing the shell application is an external
    // collaborator; embedders install one through Gateway's pool slot.
    if config.shell.enabled() {
        warn!("Shell directory configured but no worker pool is installed");
    }
    // Same deal for `key_by: function`: the key function is code, so only
    // embedders building a Gateway directly can install one.
    if config
        .rate_limit
        .as_ref()
        .is_some_and(|cfg| cfg.key_by == KeyBy::Function)
    {
        warn!("rate_limit.key_by = function but no key function is installed, keying on client IP");
    }
    let gateway = Arc::new(Gateway::new(config, kv, None)?);
    gateway.load_persisted().await;
    info!(rules = gateway.rules.len(), "Rule table ready");

    // ── Background tasks ──
    if let Some(limiter) = &gateway.limiter {
        limiter.start_cleanup(CLEANUP_INTERVAL);
    }
    let snapshotter = gateway.limiter.clone().map(|limiter| {
        Snapshotter::start(
            limiter,
            gateway.kv.clone(),
            Duration::from_millis(SNAPSHOT_INTERVAL_MS),
        )
    });

    // ── Serve ──
    let listen_addr = gateway.config.listen_addr;
    let app = portico_api::gateway_router(Arc::clone(&gateway))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new());

    info!(addr = %listen_addr, api_base = %gateway.config.api_base, "Portico is ready");
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── Shutdown: stop tickers deterministically ──
    info!("Shutting down");
    if let Some(snapshotter) = snapshotter {
        snapshotter.stop().await;
    }
    if let Some(limiter) = &gateway.limiter {
        limiter.stop_cleanup();
    }
    info!("Portico stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
