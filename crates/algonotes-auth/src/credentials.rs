use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use algonotes_db::Database;
use algonotes_types::error::{AuthError, CoreError, CoreResult, ValidationError};
use algonotes_types::models::User;

use crate::password::{hash_password, verify_password};

const HANDLE_LEN: std::ops::RangeInclusive<usize> = 3..=32;
const MIN_PASSWORD_LEN: usize = 8;

/// Owns user identities and password checks. All methods block (SQLite,
/// Argon2); async callers run them on the blocking pool.
#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<Database>,
}

impl CredentialStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn register(&self, handle: &str, email: &str, password: &str) -> CoreResult<User> {
        let handle = handle.trim();
        let email = normalize_email(email);

        if !HANDLE_LEN.contains(&handle.chars().count()) {
            return Err(ValidationError::Invalid {
                field: "handle",
                reason: "must be 3 to 32 characters",
            }
            .into());
        }
        if !email.contains('@') {
            return Err(ValidationError::Invalid {
                field: "email",
                reason: "must be an email address",
            }
            .into());
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::Invalid {
                field: "password",
                reason: "must be at least 8 characters",
            }
            .into());
        }

        if self.db.get_user_by_handle(handle)?.is_some() {
            return Err(CoreError::Conflict("handle"));
        }
        if self.db.get_user_by_email(&email)?.is_some() {
            return Err(CoreError::Conflict("email"));
        }

        let password_hash = hash_password(password)?;
        let user_id = Uuid::new_v4().to_string();

        // Lost a race with a concurrent registration for the same handle/email
        if !self.db.create_user(&user_id, handle, &email, &password_hash)? {
            return Err(CoreError::Conflict("account"));
        }

        let user = self
            .db
            .get_user_by_id(&user_id)?
            .ok_or_else(|| anyhow::anyhow!("user {} missing right after insert", user_id))?
            .into_user()?;

        info!("Registered {} ({})", user.handle, user.id);
        Ok(user)
    }

    /// Unknown email and wrong password are reported identically.
    pub fn authenticate(&self, email: &str, password: &str) -> CoreResult<User> {
        let email = normalize_email(email);
        let Some(row) = self.db.get_user_by_email(&email)? else {
            return Err(AuthError::BadCredentials.into());
        };

        if !verify_password(password, &row.password)? {
            warn!("Failed login for {}", row.handle);
            return Err(AuthError::BadCredentials.into());
        }

        Ok(row.into_user()?)
    }

    pub fn find(&self, user_id: Uuid) -> anyhow::Result<Option<User>> {
        self.db
            .get_user_by_id(&user_id.to_string())?
            .map(|row| row.into_user())
            .transpose()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
