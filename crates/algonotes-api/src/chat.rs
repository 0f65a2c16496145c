use axum::{
    Json,
    extract::{Query, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::{debug, info};

use algonotes_gateway::connection;
use algonotes_types::error::AuthError;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};
use crate::middleware::extract_token;

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    /// Browsers cannot set headers on a WebSocket handshake, so the token may
    /// also come in the query string.
    pub token: Option<String>,
}

/// GET /chat: verify the session token, then upgrade. A refused token gets
/// a 401 and the socket is never opened.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| extract_token(&headers, &jar))
        .ok_or(AuthError::Missing)?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let hub = state.hub.clone();
    let joined = match run_blocking(move || hub.join(&token)).await {
        Ok(joined) => {
            debug!("Chat handshake accepted for {}", joined.handle.identity().handle);
            joined
        }
        Err(e) => {
            info!("Chat handshake rejected: {}", e);
            return Err(e.into());
        }
    };

    // If the upgrade never completes, `joined` is dropped with the closure
    // and the connection leaves the hub.
    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, hub, joined)))
}

/// GET /chat/history: the retained messages, oldest first.
pub async fn history(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.history())
}
