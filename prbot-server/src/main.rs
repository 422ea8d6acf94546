use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use prbot_server::rate_limit::RateLimiter;
use prbot_server::webhook::{router, AppState};
use prbot_server::worker::{self, WorkerPool};
use prbot_server::{Config, Executor, HttpPlatformFactory, Metrics};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
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
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting prbot {}", prbot_server::get_bot_version());

    let config = Config::from_env().context("Failed to load configuration from environment")?;
    config
        .webhook
        .validate()
        .context("Invalid webhook configuration")?;
    let config = Arc::new(config);
    let webhook = config.webhook.clone();

    let factory = HttpPlatformFactory::from_config(&config).context("Failed to build HTTP client")?;
    let metrics = Arc::new(Metrics::new());
    let executor = Arc::new(Executor::from_config(
        Arc::new(factory),
        config.clone(),
        metrics,
    ));

    let (queue, pool) = if webhook.async_processing {
        let (sender, receiver) = worker::channel(webhook.queue_size);
        let pool = WorkerPool::spawn(webhook.workers, receiver, executor.clone());
        (Some(sender), Some(pool))
    } else {
        info!("Processing webhooks synchronously");
        (None, None)
    };
    let workers = pool.as_ref().map_or(0, WorkerPool::size);

    let cancel = CancellationToken::new();
    let limiter = if webhook.rate_limit_enabled {
        let limiter = Arc::new(RateLimiter::new(webhook.rate_limit_requests));
        limiter.clone().spawn_sweeper(cancel.clone());
        Some(limiter)
    } else {
        None
    };

    let state = Arc::new(AppState::new(executor, queue, workers));
    let app = router(state, limiter).into_make_service_with_connect_info::<SocketAddr>();

    match &webhook.tls {
        Some(tls) => {
            let rustls = RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
                .await
                .context("Failed to load TLS certificate")?;
            let handle = Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
            });
            info!("Listening on https://{}", webhook.listen_addr);
            axum_server::bind_rustls(webhook.listen_addr, rustls)
                .handle(handle)
                .serve(app)
                .await?;
        }
        None => {
            let listener = TcpListener::bind(webhook.listen_addr)
                .await
                .with_context(|| format!("Failed to bind {}", webhook.listen_addr))?;
            info!("Listening on http://{}", webhook.listen_addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    cancel.cancel();
    // The router owned the last queue sender, so the workers now see the
    // queue close once it is drained.
    if let Some(pool) = pool {
        if !pool.shutdown(webhook.shutdown_grace).await {
            warn!("Some queued webhooks were dropped at shutdown");
        }
    }
    info!("Stopped");
    Ok(())
}
