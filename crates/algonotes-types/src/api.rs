use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::NotePayload;

// -- Session token claims --

/// JWT claims shared by the REST middleware and the chat gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub handle: String,
    pub iat: i64,
    pub exp: i64,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub handle: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub handle: String,
    pub token: String,
}

// -- Notes --

/// Incoming note body. Fields are optional at the wire level so that a
/// missing field is reported as a validation error naming it, rather than a
/// generic deserialization failure.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoteRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "useCases")]
    pub use_cases: Option<String>,
    pub language: Option<String>,
    pub code: Option<String>,
}

impl NoteRequest {
    pub fn into_payload(self) -> Result<NotePayload, ValidationError> {
        NotePayload::from_parts(
            self.name,
            self.category,
            self.description,
            self.use_cases,
            self.language,
            self.code,
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReorderRequest {
    /// Every note id of the caller, front to back.
    pub ids: Vec<Uuid>,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_request_accepts_camel_case_use_cases() {
        let req: NoteRequest = serde_json::from_str(
            r#"{"name":"BFS","category":"Graph","description":"Level order","useCases":"Shortest hops"}"#,
        )
        .unwrap();
        let payload = req.into_payload().unwrap();
        assert_eq!(payload.use_cases, "Shortest hops");
    }

    #[test]
    fn note_request_rejects_unknown_fields() {
        let res = serde_json::from_str::<NoteRequest>(r#"{"name":"BFS","rank":3}"#);
        assert!(res.is_err());
    }
}
