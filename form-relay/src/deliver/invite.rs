//! Invitation delivery: ask Slack to invite an email address.
//!
//! Slack answers 200 even when it refuses an invite, with the reason in the
//! body (`{"ok": false, "error": "already_invited"}`), so the body decides
//! between delivered and rejected.

use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use super::{read_response, Deliver, Outcome};
use crate::queue::Invitation;

/// Posts invitations to the Slack invite endpoint.
#[derive(Clone)]
pub struct Inviter {
    client: Client,
    invite_url: String,
    access_token: String,
}

/// Slack Web API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl Inviter {
    pub fn new(
        client: Client,
        invite_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            invite_url: invite_url.into(),
            access_token: access_token.into(),
        }
    }
}

impl Deliver<Invitation> for Inviter {
    async fn deliver(&self, invitation: &Invitation) -> Outcome {
        let form = [
            ("email", invitation.email.as_str()),
            ("token", self.access_token.as_str()),
        ];

        let response = match self.client.post(&self.invite_url).form(&form).send().await {
            Ok(response) => response,
            Err(e) => return Outcome::Failed(e.into()),
        };

        let body = match read_response(response).await {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };

        info!(email = %invitation.email, body = %body, "invite_response");

        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(ApiResponse { ok: false, error }) => {
                Outcome::Rejected(error.unwrap_or_else(|| "unknown_error".to_string()))
            }
            _ => Outcome::Delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_form_with_email_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/users.admin.invite"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("email=a%40x.com"))
            .and(body_string_contains("token=xoxp-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let inviter = Inviter::new(
            Client::new(),
            format!("{}/api/users.admin.invite", server.uri()),
            "xoxp-secret",
        );

        assert_eq!(
            inviter.deliver(&Invitation::new("a@x.com")).await,
            Outcome::Delivered
        );
    }

    #[tokio::test]
    async fn test_slack_refusal_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"ok":false,"error":"already_invited"}"#),
            )
            .mount(&server)
            .await;

        let inviter = Inviter::new(Client::new(), server.uri(), "xoxp-secret");

        assert_eq!(
            inviter.deliver(&Invitation::new("a@x.com")).await,
            Outcome::Rejected("already_invited".to_string())
        );
    }

    #[tokio::test]
    async fn test_non_json_success_body_counts_as_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let inviter = Inviter::new(Client::new(), server.uri(), "xoxp-secret");

        assert_eq!(
            inviter.deliver(&Invitation::new("a@x.com")).await,
            Outcome::Delivered
        );
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let inviter = Inviter::new(Client::new(), server.uri(), "xoxp-secret");

        match inviter.deliver(&Invitation::new("a@x.com")).await {
            Outcome::Failed(DeliveryError::Status { status: 429, .. }) => {}
            other => panic!("expected 429 failure, got {other:?}"),
        }
    }
}
