//! Form Relay - relays application forms to Slack and sends invites.
//!
//! This binary:
//! - Receives form submissions and Slack button callbacks over HTTP
//! - Admits them to bounded in-memory queues
//! - Delivers them to Slack from one background worker per queue
//! - Drains both queues on SIGINT/SIGTERM before exiting

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use formrelay::{router, AppState, Config, Pipelines};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("form_relay_starting");

    // Load configuration
    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        port = config.port,
        slack_signing_configured = config.slack_signing_secret.is_some(),
        request_timeout_ms = config.request_timeout.as_millis() as u64,
        enqueue_timeout_ms = config.enqueue_timeout.map(|t| t.as_millis() as u64),
        retry_max_attempts = config.retry.max_attempts,
        "config_loaded"
    );

    // Create a shared HTTP client for all outbound requests
    let client = Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to create HTTP client")?;

    let pipelines = Pipelines::start(&config, client);

    // Create application state
    let state = AppState::new(
        Arc::new(config.clone()),
        pipelines.submissions.clone(),
        pipelines.invitations.clone(),
    );
    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Handlers are gone; let the workers drain what was admitted
    let reports = pipelines.shutdown().await;
    info!(
        notifications_delivered = reports.notification.delivered,
        notifications_dead_lettered = reports.notification.dead_lettered,
        invitations_delivered = reports.invitation.delivered,
        invitations_dead_lettered = reports.invitation.dead_lettered,
        "form_relay_shutdown_complete"
    );

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "sigint_handler_failed");
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
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
