mod config;
mod domain;
mod error;
mod handlers;
mod middleware;
mod repositories;
mod routes;
mod scheduler;
mod utils;

use config::AppState;
use routes::create_routes;
use scheduler::ExpirySweeper;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Entry point dari Payment Service (Click gateway untuk registrasi IELTS)
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Setup logging dengan environment
    setup_logging();

    // Create application state (includes database connection + migrations)
    let app_state = AppState::from_env().await?;

    info!(
        "🚀 Payment Service starting on {}:{}",
        app_state.config.host(),
        app_state.config.port()
    );
    info!(
        "💳 Mode: {} | Click service_id: {} | Payment timeout: {} min",
        app_state.click.environment_info(),
        app_state.config.click.service_id,
        app_state.config.click.payment_timeout_minutes
    );

    // Background sweeper untuk prepare yang kadaluarsa
    let sweeper = ExpirySweeper::new(
        app_state.store.clone(),
        Duration::from_secs(app_state.config.sweep_interval_secs),
    )
    .start();

    // Build dan start server dengan graceful shutdown
    let result = start_server(app_state).await;

    sweeper.stop().await;
    result
}

/// Inisialisasi structured logging berdasarkan environment
fn setup_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("payment_service=debug,tower_http=debug")
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Start server dengan graceful shutdown
async fn start_server(app_state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_routes(app_state.clone());

    // Bind listener ke configured address
    let listener = TcpListener::bind(format!(
        "{}:{}",
        app_state.config.host(),
        app_state.config.port()
    ))
    .await?;

    info!("🌐 Server running on http://{}:{}", app_state.config.host(), app_state.config.port());
    info!("📚 API Docs: http://{}:{}/docs", app_state.config.host(), app_state.config.port());
    info!("🏥 Health Check: http://{}:{}/health", app_state.config.host(), app_state.config.port());

    // Peer address dipakai origin validator kalau tidak ada forwarding header
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("✅ Payment Service shutdown successfully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Received shutdown signal");
}
