use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use algonotes_auth::SessionAuthenticator;
use algonotes_gateway::ChatHub;
use algonotes_types::api::{AuthResponse, LoginRequest, RegisterRequest};
use algonotes_types::models::{Identity, User};

use crate::error::{ApiError, run_blocking};
use crate::middleware::{SESSION_COOKIE, extract_token};
use crate::notes::NoteStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub auth: Arc<SessionAuthenticator>,
    pub notes: NoteStore,
    pub hub: ChatHub,
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = state.auth.clone();
    let user = run_blocking(move || {
        auth.credentials()
            .register(&req.handle, &req.email, &req.password)
    })
    .await?;

    let (jar, body) = start_session(&state, jar, user)?;
    Ok((StatusCode::CREATED, jar, body))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = state.auth.clone();
    let user = run_blocking(move || auth.credentials().authenticate(&req.email, &req.password)).await?;

    let (jar, body) = start_session(&state, jar, user)?;
    Ok((jar, body))
}

/// Drops the session cookie. Bearer tokens held elsewhere stay valid until
/// they expire.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> impl IntoResponse {
    if let Some(token) = extract_token(&headers, &jar) {
        state.auth.revoke(&token);
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (StatusCode::NO_CONTENT, jar)
}

pub async fn me(Extension(identity): Extension<Identity>) -> Json<Identity> {
    Json(identity)
}

fn start_session(
    state: &AppState,
    jar: CookieJar,
    user: User,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let token = state.auth.issue(&user)?;

    let cookie = Cookie::build((SESSION_COOKIE, token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);

    Ok((
        jar.add(cookie),
        Json(AuthResponse {
            user_id: user.id,
            handle: user.handle,
            token,
        }),
    ))
}
