use gateway::{AppState, Config, Exchange, create_router};
use persistence::InMemoryLedger;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    tracing::info!(
        symbols = ?config.symbols,
        workers = config.workers,
        "Starting exchange gateway"
    );

    let exchange = Exchange::start(config.clone(), Arc::new(InMemoryLedger::new()));
    let app = create_router(AppState::new(&exchange));

    let listener = TcpListener::bind(config.listen_addr).await?;
    tracing::info!("Listening on {}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining matching and settlement");
    exchange.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
