//! Work item types carried by the two delivery pipelines.
//!
//! This module defines:
//! - `Submission`: one form response for the notification pipeline
//! - `Invitation`: one email address for the invitation pipeline
//! - `Envelope`: a queued item plus its retry state

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Form fields that describe the landing page rather than the applicant.
pub const METADATA_FIELDS: &[&str] = &["page_id", "page_name", "page_url", "ip", "variant"];

/// A queued work item.
///
/// The key is what the worker logs to identify the item.
pub trait WorkItem: Serialize + Send + Sync + 'static {
    fn key(&self) -> &str;
}

// =============================================================================
// Submission (notification pipeline)
// =============================================================================

/// One form response.
///
/// Values are kept as raw JSON scalars; keys are ordered so rendering is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Submission {
    fields: BTreeMap<String, Value>,
}

impl Submission {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    /// The applicant's email, if present as a string.
    pub fn email(&self) -> Option<&str> {
        self.fields.get("email").and_then(Value::as_str)
    }

    /// Non-metadata fields in key order, with values rendered as text.
    pub fn answers(&self) -> impl Iterator<Item = (&str, String)> {
        self.fields
            .iter()
            .filter(|(key, _)| !METADATA_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.as_str(), render_value(value)))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Submission {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl WorkItem for Submission {
    fn key(&self) -> &str {
        self.email().unwrap_or("<missing email>")
    }
}

/// Render a JSON value the way it should read in a chat message.
fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// Invitation (invitation pipeline)
// =============================================================================

/// An email address awaiting an invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub email: String,
}

impl Invitation {
    pub fn new(email: impl Into<String>) -> Self {
        Self { email: email.into() }
    }
}

impl WorkItem for Invitation {
    fn key(&self) -> &str {
        &self.email
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// A queued item with its retry state.
///
/// The item itself is never touched after admission; only the attempt
/// counter and last error change between deliveries.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub item: T,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn new(item: T) -> Self {
        Self {
            item,
            attempts: 0,
            last_error: None,
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, error: impl ToString) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submission_deserializes_from_json_object() {
        let submission: Submission = serde_json::from_value(json!({
            "email": "a@x.com",
            "age": 31,
            "subscribed": true
        }))
        .unwrap();

        assert_eq!(submission.email(), Some("a@x.com"));
        assert_eq!(submission.len(), 3);
    }

    #[test]
    fn test_submission_email_must_be_string() {
        let submission: Submission = [("email", json!(42))].into_iter().collect();
        assert_eq!(submission.email(), None);
        assert_eq!(submission.key(), "<missing email>");
    }

    #[test]
    fn test_answers_skip_metadata_and_render_scalars() {
        let submission: Submission = [
            ("page_url", json!("https://example.com/apply")),
            ("ip", json!("10.0.0.1")),
            ("years", json!(4)),
            ("note", Value::Null),
            ("email", json!("a@x.com")),
        ]
        .into_iter()
        .collect();

        let answers: Vec<_> = submission.answers().collect();
        assert_eq!(
            answers,
            vec![
                ("email", "a@x.com".to_string()),
                ("note", String::new()),
                ("years", "4".to_string()),
            ]
        );
    }

    #[test]
    fn test_envelope_records_failures() {
        let mut envelope = Envelope::new(Invitation::new("a@x.com"));
        assert_eq!(envelope.attempts, 0);

        envelope.record_failure("connection refused");
        envelope.record_failure("connection reset");

        assert_eq!(envelope.attempts, 2);
        assert_eq!(envelope.last_error.as_deref(), Some("connection reset"));
        assert_eq!(envelope.item.email, "a@x.com");
    }
}
