//! Shared-secret checks for inbound requests.
//!
//! Slack signs interactive requests using HMAC-SHA256.
//! Reference: https://api.slack.com/authentication/verifying-requests-from-slack

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Slack signature scheme version.
const SLACK_SIGNATURE_VERSION: &str = "v0";

/// Verify a Slack request signature.
///
/// Slack sends two headers for verification:
/// - `X-Slack-Request-Timestamp`: Unix epoch seconds when the request was sent
/// - `X-Slack-Signature`: `v0=` + hex HMAC-SHA256 of `v0:{timestamp}:{body}`
///
/// # Arguments
///
/// * `signing_secret` - The app's Slack signing secret
/// * `timestamp` - The `X-Slack-Request-Timestamp` header value
/// * `body` - The raw request body, exactly as received
/// * `signature` - The `X-Slack-Signature` header value
/// * `max_age_seconds` - Maximum allowed age of the timestamp (prevents replay attacks)
///
/// # Returns
///
/// `true` if the signature is valid and not stale, `false` otherwise.
pub fn verify_slack_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    max_age_seconds: u64,
) -> bool {
    if signing_secret.is_empty() || timestamp.is_empty() || signature.is_empty() {
        warn!(
            has_signing_secret = !signing_secret.is_empty(),
            has_timestamp = !timestamp.is_empty(),
            has_signature = !signature.is_empty(),
            "slack_signature_missing_fields"
        );
        return false;
    }

    let request_time: u64 = match timestamp.parse() {
        Ok(t) => t,
        Err(_) => {
            warn!(timestamp = %timestamp, "slack_signature_invalid_timestamp");
            return false;
        }
    };

    let current_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let age = current_time.abs_diff(request_time);
    if age > max_age_seconds {
        warn!(
            request_time = request_time,
            current_time = current_time,
            age_seconds = age,
            max_age_seconds = max_age_seconds,
            "slack_signature_stale"
        );
        return false;
    }

    let Some(expected_signature) = sign(signing_secret, timestamp, body) else {
        warn!("slack_signature_invalid_key");
        return false;
    };
    let valid = constant_time_compare(&expected_signature, signature);

    if !valid {
        warn!(
            expected_length = expected_signature.len(),
            actual_length = signature.len(),
            "slack_signature_mismatch"
        );
    }

    valid
}

/// Compute the `X-Slack-Signature` value for a request.
pub fn sign(signing_secret: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes()).ok()?;

    mac.update(format!("{SLACK_SIGNATURE_VERSION}:{timestamp}:").as_bytes());
    mac.update(body);

    Some(format!(
        "{SLACK_SIGNATURE_VERSION}={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Compare a presented shared secret with the expected one.
pub fn verify_token(expected: &str, provided: &str) -> bool {
    !expected.is_empty() && constant_time_compare(expected, provided)
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
