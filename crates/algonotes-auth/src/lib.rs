//! Credential Store and Session Authenticator.
//!
//! `CredentialStore` owns users and password checks; `SessionAuthenticator`
//! turns a user into a signed bearer token and back into an [`Identity`].
//!
//! [`Identity`]: algonotes_types::models::Identity

pub mod credentials;
pub mod password;
pub mod session;

pub use credentials::CredentialStore;
pub use session::{DEFAULT_SESSION_TTL, SessionAuthenticator};
