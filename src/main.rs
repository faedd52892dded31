use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use order_notification_service::config::Settings;
use order_notification_service::server::{create_app, AppState};
use order_notification_service::tasks::{ExpirySweeper, RelaySubscriber};
use order_notification_service::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing; the guard flushes exported spans on exit
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!(
        store_backend = %settings.store.backend,
        instance_id = %settings.relay.instance_id,
        "Configuration loaded"
    );

    // Create application state
    let state = AppState::new(settings.clone())?;
    tracing::info!("Application state initialized");

    if let Some(pool) = &state.redis_pool {
        match pool.ping().await {
            Ok(()) => tracing::info!("Redis connection store reachable"),
            Err(e) => tracing::warn!(error = %e, "Redis not reachable yet, will retry on demand"),
        }
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start expiry sweeper in background
    let sweeper = ExpirySweeper::new(
        state.store().clone(),
        Duration::from_secs(settings.store.sweep_interval_seconds),
        shutdown_tx.subscribe(),
    );
    let sweeper_handle = tokio::spawn(sweeper.run());

    // Receive deliveries for our sockets from instances sharing the store
    let relay_handle = state.redis_pool.clone().map(|pool| {
        let subscriber = RelaySubscriber::new(
            pool,
            &settings.relay.channel,
            state.instance_id(),
            state.relay_inbox.clone(),
            shutdown_tx.subscribe(),
        );
        tokio::spawn(subscriber.run())
    });

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = sweeper_handle.await;
    if let Some(handle) = relay_handle {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop background tasks
    let _ = shutdown_tx.send(());
}
