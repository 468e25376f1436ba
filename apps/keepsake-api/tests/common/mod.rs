#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use keepsake_api::auth::tokens::TokenVerifier;
use keepsake_api::config::Config;
use keepsake_api::db::kv::MemoryStore;
use keepsake_api::db::users::MemoryUserDirectory;
use keepsake_api::gateway::layer::InMemoryLayer;
use keepsake_api::gateway::notify::Notifier;
use keepsake_api::gateway::presence::Presence;
use keepsake_api::models::user::User;
use keepsake_api::AppState;

pub const TEST_SECRET: &str = "test-secret-key-not-for-production";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Everything a test needs to drive and inspect the service.
pub struct TestContext {
    pub state: AppState,
    pub users: Arc<MemoryUserDirectory>,
    pub layer: Arc<InMemoryLayer>,
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        redis_url: "redis://unused".to_string(),
        secret_key: TEST_SECRET.to_string(),
        port: 0,
        presence_ttl_secs: 3600,
        heartbeat_interval: Duration::from_secs(30),
        heartbeat_timeout: None,
        max_frame_bytes: 65_536,
    }
}

pub fn test_user(id: i32, username: &str, first_name: &str, last_name: &str) -> User {
    User {
        id,
        username: username.to_string(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: format!("{username}@example.com"),
        is_active: true,
        date_joined: Utc::now(),
    }
}

/// State seeded with users 1 (Alice Anders), 2 (Bob), 3 (carol) and 7 (Sam Seven).
pub fn test_state() -> TestContext {
    test_state_with(test_config())
}

pub fn test_state_with(config: Config) -> TestContext {
    let users = Arc::new(MemoryUserDirectory::new());
    users.insert(test_user(1, "alice", "Alice", "Anders"));
    users.insert(test_user(2, "bob", "Bob", ""));
    users.insert(test_user(3, "carol", "", ""));
    users.insert(test_user(7, "sam", "Sam", "Seven"));

    let layer = Arc::new(InMemoryLayer::new());
    let state = AppState {
        users: users.clone(),
        presence: Presence::new(Arc::new(MemoryStore::new()), config.presence_ttl_secs),
        layer: layer.clone(),
        notifier: Notifier::new(layer.clone()),
        tokens: TokenVerifier::new(&config.secret_key),
        config: Arc::new(config),
    };

    TestContext {
        state,
        users,
        layer,
    }
}

pub fn mint_token_with(claims: serde_json::Value, secret: &str) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

pub fn mint_token(user_id: i32) -> String {
    mint_token_with(
        serde_json::json!({ "user_id": user_id, "exp": Utc::now().timestamp() + 300 }),
        TEST_SECRET,
    )
}

pub fn mint_expired_token(user_id: i32) -> String {
    mint_token_with(
        serde_json::json!({ "user_id": user_id, "exp": Utc::now().timestamp() - 600 }),
        TEST_SECRET,
    )
}

/// Start an actual TCP server for WebSocket testing. The server runs in the background.
pub async fn start_ws_server(state: AppState) -> SocketAddr {
    let app = keepsake_api::routes::app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

pub async fn ws_connect(addr: SocketAddr, token: &str) -> WsStream {
    let url = format!("ws://{addr}/ws/?accessToken={token}");
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .expect("ws connect");
    ws
}

/// Next frame from the server, failing the test after 5s.
pub async fn next_message(ws: &mut WsStream) -> Message {
    time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for a frame")
        .expect("stream ended")
        .expect("ws read error")
}

/// Next text frame parsed as JSON.
pub async fn next_json(ws: &mut WsStream) -> serde_json::Value {
    loop {
        match next_message(ws).await {
            Message::Text(text) => return serde_json::from_str(&text).expect("frame is JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Assert the server sends nothing for `quiet`.
pub async fn expect_silence(ws: &mut WsStream, quiet: Duration) {
    if let Ok(frame) = time::timeout(quiet, ws.next()).await {
        panic!("expected no frame, got {frame:?}");
    }
}

/// Read and discard frames until the server has been quiet for 200ms.
pub async fn drain(ws: &mut WsStream) {
    while let Ok(Some(Ok(_))) = time::timeout(Duration::from_millis(200), ws.next()).await {}
}

/// Poll until `user_id`'s presence matches `online`, failing after 2s.
pub async fn wait_for_presence(state: &AppState, user_id: i32, online: bool) {
    for _ in 0..100 {
        if state.presence.is_online(user_id).await == online {
            return;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    panic!("user {user_id} never became online={online}");
}
