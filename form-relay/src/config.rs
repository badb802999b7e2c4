//! Configuration module for environment variable parsing.
//!
//! Everything is read once at startup into an immutable `Config` that is
//! passed explicitly to the pipelines and the web server.

use std::env;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::retry::RetryPolicy;

/// Errors for configuration that cannot be defaulted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} missing")]
    Missing(&'static str),

    #[error("environment variable {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Shared secret expected in the `token` query parameter of form posts
    pub form_verification_token: String,

    /// Slack incoming webhook for submission notifications
    pub slack_webhook_url: String,

    /// Slack endpoint that sends workspace invitations
    pub slack_invite_url: String,

    /// Legacy verification token carried in Slack interactive payloads
    pub slack_verification_token: String,

    /// Token sent with every invite request
    pub slack_access_token: String,

    /// Slack signing secret for `X-Slack-Signature` verification
    pub slack_signing_secret: Option<String>,

    /// Maximum age in seconds for Slack request timestamps
    pub slack_signature_max_age: u64,

    /// Timeout for each outbound HTTP request
    pub request_timeout: Duration,

    /// How long an HTTP handler may wait for queue space. `None` = forever
    pub enqueue_timeout: Option<Duration>,

    /// Retry behaviour for both pipelines
    pub retry: RetryPolicy,

    /// Time allowed for workers to drain on shutdown
    pub shutdown_drain: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any name → value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let slack_webhook_url = required("SLACK_WEBHOOK_URL")?;
        validate_url("SLACK_WEBHOOK_URL", &slack_webhook_url)?;

        let slack_invite_url = match lookup("SLACK_INVITE_URL").filter(|v| !v.trim().is_empty()) {
            Some(url) => url.trim().to_string(),
            None => invite_url_for_org(&required("SLACK_ORG_NAME")?),
        };
        validate_url("SLACK_INVITE_URL", &slack_invite_url)?;

        let default_retry = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_or(&lookup, "RETRY_MAX_ATTEMPTS", default_retry.max_attempts),
            base_delay: parse_millis(&lookup, "RETRY_BASE_DELAY_MS", default_retry.base_delay),
            max_delay: parse_millis(&lookup, "RETRY_MAX_DELAY_MS", default_retry.max_delay),
            jitter_factor: parse_jitter(&lookup, default_retry.jitter_factor),
        };

        let enqueue_timeout =
            parse_millis(&lookup, "ENQUEUE_TIMEOUT_MS", Duration::from_secs(10));

        Ok(Config {
            port: parse_or(&lookup, "PORT", 8080),

            form_verification_token: required("FORM_VERIFICATION_TOKEN")?,

            slack_webhook_url,

            slack_invite_url,

            slack_verification_token: required("SLACK_VERIFICATION_TOKEN")?,

            slack_access_token: required("SLACK_ACCESS_TOKEN")?,

            slack_signing_secret: lookup("SLACK_SIGNING_SECRET")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),

            slack_signature_max_age: parse_or(&lookup, "SLACK_SIGNATURE_MAX_AGE", 300), // 5 minutes default

            request_timeout: parse_millis(&lookup, "REQUEST_TIMEOUT_MS", Duration::from_secs(10)),

            // 0 means wait for as long as it takes
            enqueue_timeout: (!enqueue_timeout.is_zero()).then_some(enqueue_timeout),

            retry,

            shutdown_drain: parse_millis(&lookup, "SHUTDOWN_DRAIN_MS", Duration::from_secs(10)),
        })
    }
}

/// Slack's invite endpoint for a workspace.
pub fn invite_url_for_org(org: &str) -> String {
    format!("https://{org}.slack.com/api/users.admin.invite")
}

fn validate_url(name: &'static str, raw: &str) -> Result<(), ConfigError> {
    Url::parse(raw).map(|_| ()).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

/// Parse an optional value, warning and falling back to the default if it
/// does not parse.
fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(name) else {
        return default;
    };

    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Parse `RETRY_JITTER` as a fraction in `0.0..=1.0`. `NaN` and infinities
/// parse as `f64` but are not usable, so they fall back to the default.
fn parse_jitter<F>(lookup: &F, default: f64) -> f64
where
    F: Fn(&str) -> Option<String>,
{
    let jitter: f64 = parse_or(lookup, "RETRY_JITTER", default);
    if !jitter.is_finite() {
        warn!(env_var = "RETRY_JITTER", value = %jitter, "Invalid value, using default");
        return default;
    }
    jitter.clamp(0.0, 1.0)
}

/// Parse a millisecond count into a `Duration`.
fn parse_millis<F>(lookup: &F, name: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(parse_or(lookup, name, default_ms))
}
