//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use saga::{EngineConfig, OutboxRelay, TimeoutPoller, TracingPublisher};
use saga_store::{InMemorySagaStore, PostgresSagaStore, SagaStore, TimeoutScheduler};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (text, json) = match config.log_format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
}

/// Serves HTTP and runs the background workers until shutdown.
async fn serve<S>(
    store: S,
    config: &Config,
    engine: EngineConfig,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> Result<(), BoxError>
where
    S: SagaStore + TimeoutScheduler + Clone + 'static,
{
    let state = api::create_state(store.clone(), &engine)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = OutboxRelay::new(store.clone(), TracingPublisher, engine.relay_batch_size)
        .with_retention(engine.outbox_retention);
    let relay_task = tokio::spawn(relay.run(engine.relay_interval, shutdown_rx.clone()));

    let poller = TimeoutPoller::new(store, Arc::clone(&state.router), engine.timeout_batch_size);
    let poller_task = tokio::spawn(poller.run(engine.timeout_poll_interval, shutdown_rx));

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for task in [relay_task, poller_task] {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "background worker panicked");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let engine = EngineConfig::from_env();
    tracing::info!(?engine, "engine configured");

    // 3. Pick the store and serve
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            let store = PostgresSagaStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL saga store");
            serve(store, &config, engine, metrics_handle).await?;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, saga state will not survive a restart");
            serve(InMemorySagaStore::new(), &config, engine, metrics_handle).await?;
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
