use anyhow::{Context, Result};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use conduit_core::{clock::SystemClock, config::AppConfig, metrics, Core};
use std::{process::ExitCode, sync::Arc};
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod middleware;
mod router;

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,conduit_core={0},server={0}", config.logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

fn main() -> ExitCode {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return ExitCode::from(1);
        }
    };
    init_logging(&config);

    if let Err(err) = config.validate() {
        error!(error = %err, "invalid configuration");
        return ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server failed");
            ExitCode::from(1)
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let prometheus = match metrics::init_prometheus() {
        Ok(handle) => Some(handle),
        Err(err) => {
            error!(error = %err, "metrics exporter unavailable");
            None
        }
    };

    let core = Arc::new(
        Core::new(&config, Arc::new(SystemClock))
            .await
            .context("core initialization failed")?,
    );
    let state = router::AppState { core: Arc::clone(&core), prometheus };

    let app = Router::new()
        .route("/", post(router::handle_rpc_default))
        .route("/health", get(router::handle_health))
        .route("/stats", get(router::handle_stats))
        .route("/cache/stats", get(router::handle_cache_stats))
        .route("/cache/clear", post(router::handle_cache_clear))
        .route("/metrics", get(router::handle_metrics))
        .route("/{network}", post(router::handle_rpc_network))
        .layer(axum_middleware::from_fn(middleware::correlation_id))
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(RequestBodyLimitLayer::new(config.server.request_body_limit_bytes))
        .layer(CompressionLayer::new())
        .with_state(state);

    let addr = config.socket_addr().map_err(|err| anyhow::anyhow!(err))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    core.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
