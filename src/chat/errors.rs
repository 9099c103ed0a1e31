//! Mapping of provider failures to the user-facing error vocabulary.

use serde_json::Value;

use crate::llm::ProviderError;

pub const AI_INSUFFICIENT_BALANCE: &str = "ai_insufficient_balance";
pub const AI_UNAUTHORIZED: &str = "ai_unauthorized";
pub const AI_RATE_LIMITED: &str = "ai_rate_limited";
pub const AI_UNAVAILABLE: &str = "ai_unavailable";
pub const AI_ERROR: &str = "ai_error";

/// Phrase the provider uses when the account has run out of credit.
const LOW_BALANCE_MARKER: &str = "credit balance is too low";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub message: &'static str,
    pub detail: Option<String>,
}

/// Classify a turn failure.
///
/// The detail is the nested `error.message` of a JSON provider body
/// when there is one, otherwise the raw detail text.
pub fn classify(error: &ProviderError) -> ClassifiedError {
    let status = error.status();
    let raw_detail = raw_detail(error);
    let nested = raw_detail.as_deref().and_then(nested_message);

    let haystack = format!(
        "{} {}",
        nested.as_deref().unwrap_or_default(),
        raw_detail.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    let detail = nested.or(raw_detail);

    let message = if haystack.contains(LOW_BALANCE_MARKER) {
        AI_INSUFFICIENT_BALANCE
    } else {
        match status {
            Some(401) | Some(403) => AI_UNAUTHORIZED,
            Some(429) => AI_RATE_LIMITED,
            Some(s) if s >= 500 => AI_UNAVAILABLE,
            _ => AI_ERROR,
        }
    };
    ClassifiedError { message, detail }
}

fn raw_detail(error: &ProviderError) -> Option<String> {
    let text = match error {
        ProviderError::Http { body, .. } => body.clone(),
        ProviderError::Stream { message, .. } => message.clone(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Extract `error.message` from a `{ "error": { "message": … } }` body.
fn nested_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    v.get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}
