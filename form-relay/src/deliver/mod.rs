//! Delivery functions: one queued item in, one outbound HTTP call out.
//!
//! ## Processing Flow
//!
//! ```text
//! Submission → Notifier → POST JSON → Slack incoming webhook
//! Invitation → Inviter  → POST form → Slack invite endpoint
//! ```
//!
//! Response classification is shared by both pipelines:
//! - 2xx: delivered
//! - 429 and 5xx: failed, retried
//! - other 4xx: rejected, terminal
//! - transport errors: failed, retried

pub mod invite;
pub mod message;
pub mod notify;

use std::future::Future;

use reqwest::Response;
use tracing::warn;

use crate::error::DeliveryError;

pub use invite::Inviter;
pub use message::{Attachment, AttachmentAction, SlackMessage};
pub use notify::Notifier;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Remote accepted the item.
    Delivered,
    /// Item is malformed and was dropped without a network call.
    Skipped(&'static str),
    /// Remote refused the item. Terminal.
    Rejected(String),
    /// Attempt failed; the retry policy decides what happens next.
    Failed(DeliveryError),
}

/// Sends one item to its downstream service.
pub trait Deliver<T>: Send + Sync + 'static {
    fn deliver(&self, item: &T) -> impl Future<Output = Outcome> + Send;
}

/// Read a response and sort it into success or a terminal/retryable outcome.
///
/// Returns the response body on a 2xx status.
pub(crate) async fn read_response(response: Response) -> Result<String, Outcome> {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!(status = status.as_u16(), error = %e, "response_body_read_failed");
            String::new()
        }
    };

    if status.is_success() {
        return Ok(body);
    }

    let error = DeliveryError::Status {
        status: status.as_u16(),
        body,
    };

    if error.is_retryable() {
        Err(Outcome::Failed(error))
    } else {
        Err(Outcome::Rejected(error.to_string()))
    }
}
