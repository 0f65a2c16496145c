mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    middleware,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Span, info};

use algonotes_api::auth::{self, AppState, AppStateInner};
use algonotes_api::chat;
use algonotes_api::middleware::require_auth;
use algonotes_api::notes::{self, NoteStore};
use algonotes_auth::{CredentialStore, SessionAuthenticator};
use algonotes_db::Database;
use algonotes_gateway::ChatHub;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "algonotes=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state
    let auth = Arc::new(SessionAuthenticator::new(
        config.jwt_secret.as_bytes(),
        config.session_ttl,
        CredentialStore::new(db.clone()),
    ));
    let state: AppState = Arc::new(AppStateInner {
        auth: auth.clone(),
        notes: NoteStore::new(db),
        hub: ChatHub::new(auth),
    });

    let app = router(state);

    info!("algonotes listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("algonotes stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/chat", get(chat::ws_upgrade));

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/notes", get(notes::list_notes).post(notes::create_note))
        .route("/notes/order", put(notes::reorder_notes))
        .route(
            "/notes/{note_id}",
            get(notes::get_note)
                .put(notes::update_note)
                .delete(notes::delete_note),
        )
        .route("/chat/history", get(chat::history))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Records the path only; `/chat?token=` carries a session token.
fn request_span(req: &Request) -> Span {
    tracing::debug_span!("request", method = %req.method(), path = %req.uri().path())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{StatusCode, header};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
    use tower::ServiceExt;

    use algonotes_auth::DEFAULT_SESSION_TTL;

    use super::*;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn state() -> AppState {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let auth = Arc::new(SessionAuthenticator::new(
            b"router-test",
            DEFAULT_SESSION_TTL,
            CredentialStore::new(db.clone()),
        ));
        Arc::new(AppStateInner {
            auth: auth.clone(),
            notes: NoteStore::new(db),
            hub: ChatHub::new(auth),
        })
    }

    fn app() -> Router {
        router(state())
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register(app: &Router, handle: &str) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/auth/register",
            None,
            Some(json!({
                "handle": handle,
                "email": format!("{}@example.com", handle),
                "password": "long enough password",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["token"].as_str().unwrap().to_string()
    }

    fn note(name: &str) -> Value {
        json!({
            "name": name,
            "category": "Graph",
            "description": "desc",
            "useCases": "uses",
        })
    }

    #[tokio::test]
    async fn notes_require_a_session() {
        let app = app();
        let (status, body) = call(&app, "GET", "/notes", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthenticated");

        let (status, _) = call(&app, "GET", "/notes", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, "GET", "/chat", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn note_lifecycle_over_http() {
        let app = app();
        let token = register(&app, "ada").await;

        let (status, me) = call(&app, "GET", "/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["handle"], "ada");

        let mut ids = Vec::new();
        for name in ["one", "two", "three"] {
            let (status, body) = call(&app, "POST", "/notes", Some(&token), Some(note(name))).await;
            assert_eq!(status, StatusCode::CREATED);
            ids.push(body["id"].as_str().unwrap().to_string());
        }

        let (status, body) = call(
            &app,
            "POST",
            "/notes",
            Some(&token),
            Some(json!({ "name": "half", "category": "DP" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "missing_field");

        let (status, body) = call(
            &app,
            "PUT",
            "/notes/order",
            Some(&token),
            Some(json!({ "ids": [ids[2], ids[0]] })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "bad_permutation");

        let (status, _) = call(
            &app,
            "PUT",
            "/notes/order",
            Some(&token),
            Some(json!({ "ids": [ids[2], ids[0], ids[1]] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, "DELETE", &format!("/notes/{}", ids[0]), Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, list) = call(&app, "GET", "/notes", Some(&token), None).await;
        let names: Vec<(&str, u64)> = list
            .as_array()
            .unwrap()
            .iter()
            .map(|n| (n["name"].as_str().unwrap(), n["rank"].as_u64().unwrap()))
            .collect();
        assert_eq!(names, vec![("three", 0), ("two", 1)]);
    }

    #[tokio::test]
    async fn other_users_notes_are_not_found() {
        let app = app();
        let ada = register(&app, "ada").await;
        let bob = register(&app, "bob").await;

        let (_, created) = call(&app, "POST", "/notes", Some(&ada), Some(note("private"))).await;
        let uri = format!("/notes/{}", created["id"].as_str().unwrap());

        let (status, _) = call(&app, "GET", &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "DELETE", &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "GET", &uri, Some(&ada), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn request_logs_omit_the_query_string() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter("algonotes=debug,tower_http=debug")
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let req = axum::http::Request::builder()
            .uri("/chat?token=SECRETJWTVALUE")
            .body(Body::empty())
            .unwrap();
        // no upgrade headers, so this stops at the handler
        let res = app().oneshot(req).await.unwrap();
        assert!(res.status().is_client_error());

        let logs = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("path=/chat"), "no request span in:\n{}", logs);
        assert!(!logs.contains("SECRETJWTVALUE"), "token leaked into:\n{}", logs);
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    async fn connect(addr: SocketAddr, token: &str) -> Client {
        let url = format!("ws://{}/chat?token={}", addr, token);
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    async fn send(ws: &mut Client, command: Value) {
        ws.send(WsMessage::Text(command.to_string().into())).await.unwrap();
    }

    /// Next JSON event, skipping pings.
    async fn next_event(ws: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for an event")
                .expect("socket closed")
                .unwrap();
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    fn publish(text: &str) -> Value {
        json!({ "type": "Publish", "data": { "text": text } })
    }

    #[tokio::test]
    async fn chat_over_websocket() {
        let state = state();
        let app = router(state.clone());
        let ada = register(&app, "ada").await;
        let bob = register(&app, "bob").await;
        let addr = serve(app).await;

        let mut a = connect(addr, &ada).await;
        let ready = next_event(&mut a).await;
        assert_eq!(ready["type"], "Ready");
        assert_eq!(ready["data"]["handle"], "ada");
        assert_eq!(ready["data"]["history"], json!([]));

        for text in ["first", "second"] {
            send(&mut a, publish(text)).await;
            let echo = next_event(&mut a).await;
            assert_eq!(echo["type"], "ChatMessage");
            assert_eq!(echo["data"]["text"], text);
            assert_eq!(echo["data"]["author_handle"], "ada");
        }

        let mut b = connect(addr, &bob).await;
        let ready = next_event(&mut b).await;
        assert_eq!(ready["type"], "Ready");
        let history: Vec<&str> = ready["data"]["history"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["text"].as_str().unwrap())
            .collect();
        assert_eq!(history, ["first", "second"]);

        let present = next_event(&mut b).await;
        assert_eq!(present["type"], "PresenceUpdate");
        assert_eq!(present["data"]["handle"], "ada");
        let joined = next_event(&mut a).await;
        assert_eq!(joined["type"], "PresenceUpdate");
        assert_eq!(joined["data"]["handle"], "bob");
        assert_eq!(joined["data"]["online"], true);

        send(&mut b, publish(&"x".repeat(201))).await;
        let refused = next_event(&mut b).await;
        assert_eq!(refused["type"], "Error");
        assert_eq!(refused["data"]["kind"], "message_too_long");

        send(&mut b, publish("hi ada")).await;
        for ws in [&mut a, &mut b] {
            let msg = next_event(ws).await;
            assert_eq!(msg["data"]["text"], "hi ada");
            assert_eq!(msg["data"]["author_handle"], "bob");
        }

        send(&mut b, json!({ "type": "Leave" })).await;
        let left = next_event(&mut a).await;
        assert_eq!(left["type"], "PresenceUpdate");
        assert_eq!(left["data"]["handle"], "bob");
        assert_eq!(left["data"]["online"], false);
        assert_eq!(state.hub.connection_count(), 1);

        // the server closes bob's socket
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match b.next().await {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn chat_handshake_with_bad_token_never_upgrades() {
        let state = state();
        let addr = serve(router(state.clone())).await;

        let url = format!("ws://{}/chat?token=garbage", addr);
        match tokio_tungstenite::connect_async(url).await {
            Err(tungstenite::Error::Http(res)) => assert_eq!(res.status(), 401),
            Err(other) => panic!("expected an HTTP 401, got {}", other),
            Ok(_) => panic!("handshake with a bad token was upgraded"),
        }
        assert_eq!(state.hub.connection_count(), 0);
    }
}
