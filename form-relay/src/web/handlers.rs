//! HTTP endpoint handlers.
//!
//! These handlers are designed to be fast - they only:
//! 1. Verify the shared secret
//! 2. Enqueue the item on its pipeline
//! 3. Return as soon as the item is admitted
//!
//! Delivery happens in the pipeline workers; a handler never waits for it.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        rejection::{FormRejection, JsonRejection},
        Form, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use url::form_urlencoded;

use crate::deliver::message::{decision_outcome, ACCEPT_VALUE, DECISION_ACTION};
use crate::queue::{AdmissionError, Invitation, Producer, Submission};
use crate::web::signature::{verify_slack_signature, verify_token};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub submissions: Producer<Submission>,
    pub invitations: Producer<Invitation>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        submissions: Producer<Submission>,
        invitations: Producer<Invitation>,
    ) -> Self {
        Self {
            config,
            submissions,
            invitations,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Liveness probe kept for existing form integrations.
pub async fn index() -> &'static str {
    "OK"
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub submissions_queued: usize,
    pub invitations_queued: usize,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        submissions_queued: state.submissions.depth(),
        invitations_queued: state.invitations.depth(),
    })
}

// =============================================================================
// Admission
// =============================================================================

/// Shared secret passed as `?token=`.
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: String,
}

/// Enqueue response.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<usize>,
}

fn reply(status: StatusCode, label: &str) -> Response {
    (
        status,
        Json(EnqueueResponse {
            status: label.to_string(),
            queue_depth: None,
        }),
    )
        .into_response()
}

/// Admit an item to a pipeline queue, waiting at most `wait` for space.
async fn admit<T>(
    pipeline: &'static str,
    producer: &Producer<T>,
    item: T,
    wait: Option<Duration>,
) -> Result<usize, Response> {
    match producer.enqueue_timeout(item, wait).await {
        Ok(depth) => {
            info!(pipeline, queue_depth = depth, "item_enqueued");
            Ok(depth)
        }
        Err(e @ AdmissionError::TimedOut { .. }) => {
            warn!(pipeline, error = %e, "enqueue_timed_out");
            Err(reply(StatusCode::SERVICE_UNAVAILABLE, "queue_full"))
        }
        Err(e @ AdmissionError::Closed) => {
            error!(pipeline, error = %e, "enqueue_failed");
            Err(reply(StatusCode::SERVICE_UNAVAILABLE, "unavailable"))
        }
    }
}

fn enqueued(depth: usize) -> Response {
    (
        StatusCode::OK,
        Json(EnqueueResponse {
            status: "enqueued".to_string(),
            queue_depth: Some(depth),
        }),
    )
        .into_response()
}

// =============================================================================
// Form submissions
// =============================================================================

/// Form submission endpoint.
///
/// This endpoint:
/// 1. Verifies the `token` query parameter, before looking at the body
/// 2. Enqueues the submission for Slack notification
/// 3. Returns the queue depth
pub async fn review(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    body: Result<Json<Submission>, JsonRejection>,
) -> Response {
    if !verify_token(&state.config.form_verification_token, &query.token) {
        warn!("submission_token_invalid");
        return reply(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let submission = match body {
        Ok(Json(submission)) => submission,
        Err(e) => {
            warn!(error = %e, "submission_body_invalid");
            return reply(StatusCode::BAD_REQUEST, "invalid_body");
        }
    };

    info!(
        fields = submission.len(),
        has_email = submission.email().is_some(),
        "submission_received"
    );

    match admit(
        "notification",
        &state.submissions,
        submission,
        state.config.enqueue_timeout,
    )
    .await
    {
        Ok(depth) => enqueued(depth),
        Err(response) => response,
    }
}

/// Direct invite form payload.
#[derive(Debug, Deserialize)]
pub struct InviteForm {
    #[serde(default)]
    pub email: String,
}

/// Direct invite endpoint, skipping the Slack review step.
pub async fn invite(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    body: Result<Form<InviteForm>, FormRejection>,
) -> Response {
    if !verify_token(&state.config.form_verification_token, &query.token) {
        warn!("invite_token_invalid");
        return reply(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let form = match body {
        Ok(Form(form)) => form,
        Err(e) => {
            warn!(error = %e, "invite_body_invalid");
            return reply(StatusCode::BAD_REQUEST, "invalid_body");
        }
    };

    let email = form.email.trim();
    if email.is_empty() || !email.contains('@') {
        warn!(email = %email, "invite_email_invalid");
        return reply(StatusCode::BAD_REQUEST, "invalid_email");
    }

    match admit(
        "invitation",
        &state.invitations,
        Invitation::new(email),
        state.config.enqueue_timeout,
    )
    .await
    {
        Ok(depth) => enqueued(depth),
        Err(response) => response,
    }
}

// =============================================================================
// Slack interactive callback
// =============================================================================

/// Interactive message callback sent by Slack when a button is clicked.
#[derive(Debug, Deserialize)]
pub struct ActionCallback {
    /// Email the decision buttons were keyed on
    #[serde(default)]
    pub callback_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub user: SlackUser,
    #[serde(default)]
    pub actions: Vec<CallbackAction>,
    /// The message that carried the buttons
    #[serde(default)]
    pub original_message: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct SlackUser {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackAction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Slack interactive message endpoint.
///
/// This endpoint:
/// 1. Verifies the request signature (if a signing secret is configured)
/// 2. Verifies the verification token inside the payload
/// 3. On Accept, enqueues an invitation for the applicant
/// 4. Returns the original message with the buttons replaced by the decision
pub async fn accept(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(secret) = state.config.slack_signing_secret.as_deref() {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
        };

        if !verify_slack_signature(
            secret,
            header("X-Slack-Request-Timestamp"),
            &body,
            header("X-Slack-Signature"),
            state.config.slack_signature_max_age,
        ) {
            warn!("slack_signature_invalid");
            return StatusCode::BAD_REQUEST.into_response();
        }
    }

    let raw = form_urlencoded::parse(&body)
        .find(|(key, _)| key == "payload")
        .map(|(_, value)| value.into_owned());

    let Some(raw) = raw else {
        warn!("slack_payload_missing");
        return StatusCode::BAD_REQUEST.into_response();
    };

    let callback: ActionCallback = match serde_json::from_str(&raw) {
        Ok(callback) => callback,
        Err(e) => {
            warn!(error = %e, "slack_payload_invalid");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if !verify_token(&state.config.slack_verification_token, &callback.token) {
        warn!(callback_id = %callback.callback_id, "slack_token_invalid");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let Some(action) = callback.actions.first() else {
        warn!(callback_id = %callback.callback_id, "slack_payload_without_actions");
        return StatusCode::BAD_REQUEST.into_response();
    };

    let accepted = action.name == DECISION_ACTION && action.value == ACCEPT_VALUE;

    info!(
        callback_id = %callback.callback_id,
        user = %callback.user.name,
        accepted,
        "slack_decision_received"
    );

    if accepted {
        if callback.callback_id.trim().is_empty() {
            warn!("slack_accept_without_email");
            return StatusCode::BAD_REQUEST.into_response();
        }

        let invitation = Invitation::new(callback.callback_id.as_str());
        if let Err(response) = admit(
            "invitation",
            &state.invitations,
            invitation,
            state.config.enqueue_timeout,
        )
        .await
        {
            return response;
        }
    }

    let outcome = decision_outcome(accepted, &callback.user.name);
    let attachments = match serde_json::to_value(vec![outcome]) {
        Ok(attachments) => attachments,
        Err(e) => {
            error!(error = %e, "slack_attachment_encode_failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut message = match callback.original_message {
        Value::Object(message) => message,
        _ => serde_json::Map::new(),
    };
    message.insert("attachments".to_string(), attachments);

    (StatusCode::OK, Json(Value::Object(message))).into_response()
}
