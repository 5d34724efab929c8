//! Completion payloads read from the result store.
//!
//! The queue worker does not guarantee the shape of its return value: most
//! jobs write a JSON object carrying an artifact URL, but some emit a bare
//! URL string. Both shapes are modeled explicitly and normalized through a
//! single `artifact_url` step.

use serde_json::Value as JsonValue;

/// Structured-object keys checked for an artifact reference, in priority order.
const ARTIFACT_KEYS: [&str; 3] = ["r2_url", "video_url", "result"];

/// Result payload for a completed job.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionPayload {
    /// Parsed JSON object from the result store.
    Structured(JsonValue),
    /// Raw text that did not parse as JSON; treated as an artifact reference.
    Raw(String),
}

impl CompletionPayload {
    /// Parse a result-store field value.
    ///
    /// Returns `None` for empty input (no completion signal yet). Text that
    /// is not valid JSON is tolerated and wrapped as `Raw`.
    pub fn from_field(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        match serde_json::from_str::<JsonValue>(raw) {
            Ok(value) if value.is_object() => Some(Self::Structured(value)),
            // JSON scalars (a bare quoted string, a number) carry no fields
            // worth preserving; keep the original text.
            Ok(_) | Err(_) => Some(Self::Raw(raw.to_string())),
        }
    }

    /// Normalize either variant into a retrievable artifact reference.
    ///
    /// A payload is "ready" if and only if this returns `Some`.
    pub fn artifact_url(&self) -> Option<&str> {
        match self {
            Self::Structured(value) => ARTIFACT_KEYS
                .iter()
                .find_map(|key| value.get(key).and_then(JsonValue::as_str))
                .filter(|url| !url.is_empty()),
            Self::Raw(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
        }
    }
}
