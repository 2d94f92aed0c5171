use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use reserva::config::ServerConfig;
use reserva::engine::Engine;
use reserva::http::{AppState, build_router};
use reserva::notify::NotifyHub;
use reserva::outbox::{ChannelRegistry, run_outbox_worker};
use reserva::reaper::{run_compactor, run_reaper};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();
    reserva::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = PathBuf::from(&config.data_dir).join("reserva.wal");

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(wal_path, notify, config.core.clone())?);

    let registry = Arc::new(ChannelRegistry::with_defaults());
    tokio::spawn(run_outbox_worker(engine.clone(), registry));
    tokio::spawn(run_reaper(engine.clone()));
    tokio::spawn(run_compactor(engine.clone(), config.compact_threshold));

    let router = build_router(AppState {
        engine: engine.clone(),
    });

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("reserva listening on {addr}");
    info!("  data_dir: {}", config.data_dir);
    info!(
        "  channels: {}",
        config
            .core
            .channels
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!(
                "http://0.0.0.0:{p}/metrics"
            ))
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("reserva stopped");
    Ok(())
}

/// Stop accepting on SIGTERM/ctrl-c; axum drains in-flight requests.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received");
}
