use modelgate::config::CONFIG;
use modelgate::service::health::HEALTH;
use modelgate::service::session;
use modelgate::{create_app, database};

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&CONFIG.log_level)),
        )
        .init();

    database::init();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let health_task = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { HEALTH.run(shutdown_rx).await }
    });
    let sweeper_task = tokio::spawn(session::run_sweeper(shutdown_rx));

    let addr = format!("{}:{}", &CONFIG.host, CONFIG.port);
    info!("server start at {}", &addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listen address");

    axum::serve(listener, create_app())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("failed to start server");

    // Stop the background loops before the process (and the store) goes away.
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(health_task, sweeper_task);
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
