use thiserror::Error;

/// Why a session token or credential pair was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no session token presented")]
    Missing,
    #[error("session token is malformed or has been tampered with")]
    Malformed,
    #[error("session token has expired")]
    Expired,
    #[error("session token does not resolve to a known user")]
    Unknown,
    #[error("invalid email or password")]
    BadCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("ordering must list every note exactly once")]
    BadPermutation,
    #[error("message exceeds {max} characters")]
    MessageTooLong { max: usize },
    #[error("message is empty")]
    Empty,
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: &'static str },
}

impl ValidationError {
    /// Stable machine-readable name, used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::BadPermutation => "bad_permutation",
            Self::MessageTooLong { .. } => "message_too_long",
            Self::Empty => "empty",
            Self::Invalid { .. } => "invalid",
        }
    }
}

/// Result kinds returned by the core to the HTTP/WebSocket layer.
///
/// Only `Internal` is worth retrying; everything else reflects the request
/// itself.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "unauthenticated",
            Self::NotFound => "not_found",
            Self::Validation(v) => v.kind(),
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_internal_errors_are_retryable() {
        assert!(CoreError::Internal(anyhow::anyhow!("disk full")).is_retryable());
        assert!(!CoreError::NotFound.is_retryable());
        assert!(!CoreError::from(AuthError::Expired).is_retryable());
        assert!(!CoreError::from(ValidationError::BadPermutation).is_retryable());
    }

    #[test]
    fn validation_kind_surfaces_the_violated_constraint() {
        let err = CoreError::from(ValidationError::MessageTooLong { max: 200 });
        assert_eq!(err.kind(), "message_too_long");
        assert_eq!(err.to_string(), "message exceeds 200 characters");
    }
}
