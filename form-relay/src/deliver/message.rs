//! Slack message construction for form submissions.
//!
//! A submission with too few distinct answers is a "dud" and gets a one-line
//! alert. Anything else is rendered field by field with Accept/Reject buttons
//! keyed by the applicant's email.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::queue::Submission;

/// Minimum number of distinct non-empty answers for a full message.
pub const DUD_THRESHOLD: usize = 3;

/// Name shared by the Accept and Reject buttons.
pub const DECISION_ACTION: &str = "action";

/// Button value that triggers an invitation.
pub const ACCEPT_VALUE: &str = "accept";

/// Incoming-webhook message body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlackMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Message attachment, used both for the decision buttons and for the
/// decision outcome that replaces them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub callback_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<AttachmentAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mrkdwn_in: Vec<String>,
}

/// Interactive button.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentAction {
    pub name: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    pub style: String,
}

impl AttachmentAction {
    fn button(text: &str, value: &str, style: &str) -> Self {
        Self {
            name: DECISION_ACTION.to_string(),
            text: text.to_string(),
            kind: "button".to_string(),
            value: value.to_string(),
            style: style.to_string(),
        }
    }
}

impl SlackMessage {
    /// Build the notification for a submission.
    ///
    /// Returns `None` when the submission has no email to key the decision on.
    pub fn for_submission(submission: &Submission) -> Option<Self> {
        let email = submission.email()?;

        if is_dud(submission) {
            return Some(dud_message(email));
        }

        Some(full_message(submission, email))
    }
}

/// Whether a submission has fewer than `DUD_THRESHOLD` distinct answers.
///
/// Empty values and metadata fields do not count.
pub fn is_dud(submission: &Submission) -> bool {
    let distinct: HashSet<String> = submission
        .answers()
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
        .collect();

    distinct.len() < DUD_THRESHOLD
}

pub fn dud_message(email: &str) -> SlackMessage {
    SlackMessage {
        text: format!("Dud Request from: {email}\n"),
        attachments: Vec::new(),
    }
}

fn full_message(submission: &Submission, email: &str) -> SlackMessage {
    let mut text = String::new();
    for (key, value) in submission.answers() {
        text.push_str(&format!("{}: {}\n", pretty_key(key), value));
    }
    text.push('\n');

    SlackMessage {
        text,
        attachments: vec![decision_attachment(email)],
    }
}

/// Accept/Reject buttons keyed by the applicant's email.
pub fn decision_attachment(email: &str) -> Attachment {
    Attachment {
        text: "Your decision ...".to_string(),
        callback_id: email.to_string(),
        actions: vec![
            AttachmentAction::button("Accept", ACCEPT_VALUE, "primary"),
            AttachmentAction::button("Reject", "reject", "danger"),
        ],
        ..Default::default()
    }
}

/// Attachment that replaces the buttons once someone has decided.
pub fn decision_outcome(accepted: bool, user: &str) -> Attachment {
    let (text, color) = if accepted {
        (
            format!(":white_check_mark: <@{user}> *accepted this application*"),
            "good",
        )
    } else {
        (format!(":no_entry: <@{user}> *rejected this application*"), "danger")
    };

    Attachment {
        text,
        color: color.to_string(),
        mrkdwn_in: vec!["text".to_string()],
        ..Default::default()
    }
}

/// `first_name` → `First Name`, `first-name` → `First-Name`.
///
/// Underscores become spaces. A letter is upper-cased when it starts the key
/// or follows a word boundary: any ASCII character other than a letter, digit
/// or underscore, or any Unicode whitespace.
pub fn pretty_key(key: &str) -> String {
    let mut pretty = String::with_capacity(key.len());
    let mut after_boundary = true;

    for c in key.chars().map(|c| if c == '_' { ' ' } else { c }) {
        if after_boundary {
            pretty.extend(c.to_uppercase());
        } else {
            pretty.push(c);
        }
        after_boundary = is_word_boundary(c);
    }

    pretty
}

fn is_word_boundary(c: char) -> bool {
    if c.is_ascii() {
        return !(c.is_ascii_alphanumeric() || c == '_');
    }
    !c.is_alphanumeric() && c.is_whitespace()
}
