use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub handle: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// A verified caller. Produced only by the session authenticator, so holding
/// one means the token behind it was checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub handle: String,
}

/// The editable part of a note. Every field except `language` and `code` is
/// required and must not be blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePayload {
    pub name: String,
    pub category: String,
    pub description: String,
    pub use_cases: String,
    pub language: Option<String>,
    pub code: Option<String>,
}

impl NotePayload {
    /// Build a payload from loosely-filled input, trimming text fields and
    /// rejecting the first missing required field.
    pub fn from_parts(
        name: Option<String>,
        category: Option<String>,
        description: Option<String>,
        use_cases: Option<String>,
        language: Option<String>,
        code: Option<String>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            name: required("name", name)?,
            category: required("category", category)?,
            description: required("description", description)?,
            use_cases: required("use_cases", use_cases)?,
            language: optional(language),
            code: code.filter(|c| !c.trim().is_empty()),
        })
    }
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ValidationError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(flatten)]
    pub payload: NotePayload,
    pub rank: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Chat messages live only in memory: the hub's history buffer and the
/// outbound queues of connected peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_handle: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn payload_trims_and_keeps_optional_fields() {
        let payload = NotePayload::from_parts(
            s("  Dijkstra "),
            s("Graph"),
            s("Shortest paths from one source"),
            s("Routing"),
            s(" rust "),
            None,
        )
        .unwrap();

        assert_eq!(payload.name, "Dijkstra");
        assert_eq!(payload.language.as_deref(), Some("rust"));
        assert_eq!(payload.code, None);
    }

    #[test]
    fn blank_required_field_is_missing() {
        let err = NotePayload::from_parts(s("Kadane"), s("   "), s("d"), s("u"), None, None)
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("category"));

        let err = NotePayload::from_parts(s("Kadane"), s("DP"), s("d"), None, None, None)
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("use_cases"));
    }
}
