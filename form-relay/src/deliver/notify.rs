//! Notification delivery: post a submission summary to a Slack webhook.

use reqwest::Client;
use tracing::info;

use super::{message::SlackMessage, read_response, Deliver, Outcome};
use crate::queue::Submission;

/// Posts submissions to a Slack incoming webhook.
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    webhook_url: String,
}

impl Notifier {
    pub fn new(client: Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }
}

impl Deliver<Submission> for Notifier {
    async fn deliver(&self, submission: &Submission) -> Outcome {
        let Some(message) = SlackMessage::for_submission(submission) else {
            return Outcome::Skipped("missing email");
        };

        info!(
            has_decision = !message.attachments.is_empty(),
            text_length = message.text.len(),
            "notification_sending"
        );

        let response = match self.client.post(&self.webhook_url).json(&message).send().await {
            Ok(response) => response,
            Err(e) => return Outcome::Failed(e.into()),
        };

        match read_response(response).await {
            Ok(_) => Outcome::Delivered,
            Err(outcome) => outcome,
        }
    }
}
