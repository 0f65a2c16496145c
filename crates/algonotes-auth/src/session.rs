use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, info};
use uuid::Uuid;

use algonotes_types::api::Claims;
use algonotes_types::error::{AuthError, CoreResult};
use algonotes_types::models::{Identity, User};

use crate::credentials::CredentialStore;

pub const DEFAULT_SESSION_TTL: Duration = Duration::days(7);

/// Issues and checks signed session tokens (HS256 JWTs).
///
/// Key material is fixed at construction and only read afterwards, so a
/// single instance is shared by every request and connection. There is no
/// revocation list: a token stays valid until its `exp`.
pub struct SessionAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
    credentials: CredentialStore,
}

impl SessionAuthenticator {
    pub fn new(secret: &[u8], ttl: Duration, credentials: CredentialStore) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked by hand against an explicit clock, without leeway.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
            credentials,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn issue(&self, user: &User) -> anyhow::Result<String> {
        self.issue_at(user, Utc::now())
    }

    pub fn issue_at(&self, user: &User, now: DateTime<Utc>) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user.id,
            handle: user.handle.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Signature and expiry only; no user lookup.
    pub fn decode_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                debug!("Rejected session token: {}", e);
                AuthError::Malformed
            })?
            .claims;

        if now.timestamp() >= claims.exp {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }

    /// Full check run on every request and at chat handshake. Blocks on a
    /// user lookup.
    pub fn verify(&self, token: &str) -> CoreResult<Identity> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> CoreResult<Identity> {
        let claims = self.decode_at(token, now)?;
        let user = self
            .credentials
            .find(claims.sub)?
            .ok_or(AuthError::Unknown)?;

        Ok(Identity {
            user_id: user.id,
            handle: user.handle,
        })
    }

    /// Best-effort logout. Nothing is recorded server side; the transport
    /// drops its copy of the token. Returns the token's subject when it can
    /// still be read, for logging.
    pub fn revoke(&self, token: &str) -> Option<Uuid> {
        let sub = decode::<Claims>(token, &self.decoding, &self.validation)
            .ok()
            .map(|data| data.claims.sub);
        if let Some(user_id) = sub {
            info!("Session for {} revoked client-side", user_id);
        }
        sub
    }
}
