//! picvault server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use picvault_cache::{
    ArchivePool, CacheController, CacheParts, Janitor, SettingsHandle, SystemClock,
};
use picvault_core::config::AppConfig;
use picvault_server::{AppState, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// picvault - tiered image cache for AI-generated images
#[derive(Parser, Debug)]
#[command(name = "picvault-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PICVAULT_CONFIG",
        default_value = "config/picvault.toml"
    )]
    config: String,
}

/// Load configuration from the optional file, then `PICVAULT_` env vars.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("PICVAULT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("picvault v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    picvault_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let local = picvault_storage::local_from_config(&config.local)
        .await
        .context("failed to open local store")?;
    local
        .health_check()
        .await
        .context("local store health check failed")?;
    tracing::info!(path = %config.local.path.display(), "Local store ready");

    let remote = picvault_storage::remote_from_config(&config.remote)
        .await
        .context("failed to initialize remote archive")?;
    match &remote {
        Some(remote) => {
            remote
                .health_check()
                .await
                .context("remote archive health check failed")?;
            tracing::info!(backend = remote.backend_name(), "Remote archive ready");
        }
        None => tracing::warn!(
            "Remote archive disabled: images stay pending and are only evicted under allow_unarchived_eviction"
        ),
    }

    let metadata = picvault_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;

    let settings = SettingsHandle::load(
        metadata.clone(),
        &config.policy,
        OffsetDateTime::now_utc(),
    )
    .await
    .context("failed to load cache policy")?;

    let (cache, receiver) = CacheController::new(
        CacheParts {
            metadata,
            local: Arc::new(local),
            remote,
            settings: Arc::new(settings),
            timeouts: config.timeouts.clone(),
            batch_size: config.archive.scan_batch_size,
            clock: Arc::new(SystemClock),
        },
        config.archive.queue_capacity,
    );

    cache
        .reconcile()
        .await
        .context("failed to reconcile local store")?;

    let shutdown = CancellationToken::new();

    let archive = receiver.map(|receiver| {
        ArchivePool::new(cache.clone(), receiver, config.archive.clone()).spawn(shutdown.clone())
    });
    let janitor = Janitor::new(cache.clone(), config.janitor.clone()).spawn(shutdown.clone());

    let state = AppState::new(config.clone(), cache);
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("Listening on {}", addr);

    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        server_shutdown.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // The server may also stop on its own error path.
    shutdown.cancel();
    if let Some(archive) = archive
        && let Err(e) = archive.await
    {
        tracing::error!(error = %e, "Archive pool task failed");
    }
    if let Err(e) = janitor.await {
        tracing::error!(error = %e, "Janitor task failed");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
