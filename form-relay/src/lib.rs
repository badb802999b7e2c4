//! Form Relay - async relay from application forms to Slack.
//!
//! This library provides the modules behind the `form-relay` binary:
//! - `web`: Thin web server for form posts and Slack button callbacks
//! - `queue`: Bounded in-memory queues of 1000 items each
//! - `worker`: One consumer per queue with backoff and tail re-queueing
//! - `deliver`: Outbound Slack notification and invite requests
//!
//! ## Architecture
//!
//! ```text
//! Form → /review → submissions → Notifier → Slack channel
//! Slack button → /accept → invitations → Inviter → Slack invite
//! ```

pub mod config;
pub mod deliver;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod web;
pub mod worker;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use deliver::{Deliver, Inviter, Notifier, Outcome};
pub use error::DeliveryError;
pub use pipeline::{PipelineReports, Pipelines};
pub use queue::{
    bounded, AdmissionError, Consumer, Envelope, Invitation, Producer, Submission,
    QUEUE_CAPACITY,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use web::{router, AppState};
pub use worker::{DeadLetter, Worker, WorkerReport};
