//! Web server module for handling inbound forms and Slack callbacks.
//!
//! This module provides a thin, fast web server that:
//! - Receives form submissions and Slack button callbacks
//! - Verifies shared secrets
//! - Enqueues work onto the in-memory pipelines
//! - Returns as soon as the work is admitted
//!
//! All outbound delivery happens in the pipeline workers.

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use handlers::{
    accept, health, index, invite, review, ActionCallback, AppState, EnqueueResponse,
    HealthResponse, InviteForm, TokenQuery,
};
pub use signature::{verify_slack_signature, verify_token};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/review", post(review))
        .route("/invite", post(invite))
        .route("/accept", post(accept))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
