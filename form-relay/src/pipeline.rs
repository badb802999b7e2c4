//! Wiring for the two delivery pipelines.
//!
//! ```text
//! /review ──► submissions (1000) ──► notification worker ──► Slack webhook
//! /accept ──► invitations (1000) ──► invitation worker   ──► Slack invite API
//! ```

use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::deliver::{Inviter, Notifier};
use crate::queue::{bounded, Invitation, Producer, Submission, QUEUE_CAPACITY};
use crate::worker::{Worker, WorkerReport};
use crate::Config;

pub const NOTIFICATION_PIPELINE: &str = "notification";
pub const INVITATION_PIPELINE: &str = "invitation";

/// Running pipelines: the producer side of each queue plus its worker.
pub struct Pipelines {
    pub submissions: Producer<Submission>,
    pub invitations: Producer<Invitation>,
    shutdown: CancellationToken,
    notification: JoinHandle<WorkerReport>,
    invitation: JoinHandle<WorkerReport>,
}

/// Final counters from both workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReports {
    pub notification: WorkerReport,
    pub invitation: WorkerReport,
}

impl Pipelines {
    /// Create both queues and spawn their workers on the current runtime.
    pub fn start(config: &Config, client: Client) -> Self {
        let shutdown = CancellationToken::new();

        let (submissions, submission_rx) = bounded(QUEUE_CAPACITY);
        let notifier = Notifier::new(client.clone(), config.slack_webhook_url.as_str());
        let notification = Worker::new(NOTIFICATION_PIPELINE, notifier, submissions.clone())
            .with_policy(config.retry.clone())
            .with_drain_timeout(config.shutdown_drain);
        let notification = tokio::spawn(notification.run(submission_rx, shutdown.clone()));

        let (invitations, invitation_rx) = bounded(QUEUE_CAPACITY);
        let inviter = Inviter::new(
            client,
            config.slack_invite_url.as_str(),
            config.slack_access_token.as_str(),
        );
        let invitation = Worker::new(INVITATION_PIPELINE, inviter, invitations.clone())
            .with_policy(config.retry.clone())
            .with_drain_timeout(config.shutdown_drain);
        let invitation = tokio::spawn(invitation.run(invitation_rx, shutdown.clone()));

        info!(capacity = QUEUE_CAPACITY, "pipelines_started");

        Self {
            submissions,
            invitations,
            shutdown,
            notification,
            invitation,
        }
    }

    /// Signal both workers to stop and wait for their drains to finish.
    pub async fn shutdown(self) -> PipelineReports {
        info!(
            submissions_queued = self.submissions.depth(),
            invitations_queued = self.invitations.depth(),
            "pipelines_stopping"
        );
        self.shutdown.cancel();

        let (notification, invitation) =
            futures::future::join(self.notification, self.invitation).await;

        PipelineReports {
            notification: joined(NOTIFICATION_PIPELINE, notification),
            invitation: joined(INVITATION_PIPELINE, invitation),
        }
    }
}

fn joined(
    pipeline: &'static str,
    result: Result<WorkerReport, tokio::task::JoinError>,
) -> WorkerReport {
    result.unwrap_or_else(|e| {
        error!(pipeline, error = %e, "worker_join_failed");
        WorkerReport::default()
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config_for(server: &MockServer) -> Config {
        let webhook = format!("{}/webhook", server.uri());
        let invite = format!("{}/invite", server.uri());
        let vars = [
            ("FORM_VERIFICATION_TOKEN", "form-secret"),
            ("SLACK_WEBHOOK_URL", webhook.as_str()),
            ("SLACK_INVITE_URL", invite.as_str()),
            ("SLACK_VERIFICATION_TOKEN", "verify-secret"),
            ("SLACK_ACCESS_TOKEN", "xoxp-secret"),
            ("RETRY_BASE_DELAY_MS", "10"),
            ("RETRY_JITTER", "0"),
        ];

        Config::from_lookup(|name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    async fn wait_for_requests(server: &MockServer, count: usize) {
        for _ in 0..200 {
            if server.received_requests().await.unwrap_or_default().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} requests");
    }

    #[tokio::test]
    async fn test_pipelines_deliver_and_report() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/invite"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let pipelines = Pipelines::start(&config_for(&server), Client::new());

        let submission: Submission = [
            ("email", "a@x.com"),
            ("q1", "yes"),
            ("q2", "no"),
            ("q3", "maybe"),
        ]
        .into_iter()
        .collect();
        pipelines.submissions.enqueue(submission).await.unwrap();
        pipelines
            .invitations
            .enqueue(Invitation::new("a@x.com"))
            .await
            .unwrap();

        wait_for_requests(&server, 2).await;

        let reports = pipelines.shutdown().await;
        assert_eq!(reports.notification.delivered, 1);
        assert_eq!(reports.invitation.delivered, 1);
    }

    #[tokio::test]
    async fn test_pipeline_retries_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invite"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/invite"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let pipelines = Pipelines::start(&config_for(&server), Client::new());
        pipelines
            .invitations
            .enqueue(Invitation::new("a@x.com"))
            .await
            .unwrap();

        wait_for_requests(&server, 2).await;

        let reports = pipelines.shutdown().await;
        assert_eq!(reports.invitation.retried, 1);
        assert_eq!(reports.invitation.delivered, 1);
        assert_eq!(reports.notification, WorkerReport::default());
    }
}
