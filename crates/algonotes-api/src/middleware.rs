use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use algonotes_types::error::AuthError;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};

/// Cookie carrying the session token for browser clients.
pub const SESSION_COOKIE: &str = "algonotes_session";

/// Find the session token: `Authorization: Bearer` first, then the session
/// cookie.
pub fn extract_token(headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    bearer
        .map(str::to_string)
        .or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_string()))
}

/// Verify the session token and attach the caller's `Identity` to the
/// request. Handlers behind this layer read it with `Extension<Identity>`.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(req.headers(), &jar).ok_or(AuthError::Missing)?;

    let auth = state.auth.clone();
    let identity = run_blocking(move || auth.verify(&token)).await?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
