use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use presence_chat::{config::Settings, db, AppState};
use sqlx::SqlitePool;
use reqwest::{header::SET_COOKIE, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tokio_tungstenite::{
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    db_pool: SqlitePool,
    shutdown: CancellationToken,
    sessions: TaskTracker,
    _db_dir: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let db_dir = tempfile::tempdir().unwrap();
        let database_url = format!("sqlite://{}?mode=rwc", db_dir.path().join("chat.db").display());
        let db_pool = db::connect(&database_url).await.unwrap();

        let settings = Settings {
            database_url,
            push_timeout: Duration::from_millis(200),
            ..Settings::default()
        };
        let app_state = AppState::new(db_pool.clone(), settings);
        let shutdown = app_state.shutdown.clone();
        let sessions = app_state.sessions.clone();
        let app = presence_chat::app(app_state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
                .ok();
        });

        Self {
            addr,
            db_pool,
            shutdown,
            sessions,
            _db_dir: db_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

struct User {
    id: Uuid,
    http: reqwest::Client,
    cookie: String,
}

async fn sign_up(server: &TestServer, name: &str, email: &str) -> User {
    let http = reqwest::Client::builder().cookie_store(true).build().unwrap();

    let resp = http
        .post(server.url("/auth/register"))
        .json(&json!({ "email": email, "password": "secret", "password_check": "secret", "name": name }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = http
        .post(server.url("/auth/login"))
        .json(&json!({ "email": email, "password": "secret" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp
        .headers()
        .get(SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_owned();

    let me: Value = http.get(server.url("/auth/me")).send().await.unwrap().json().await.unwrap();
    let id = Uuid::parse_str(me["id"].as_str().unwrap()).unwrap();

    User { id, http, cookie }
}

async fn online_flag(server: &TestServer, viewer: &User, user_id: Uuid) -> bool {
    let users: Vec<Value> = viewer
        .http
        .get(server.url("/auth/users"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    users
        .iter()
        .find(|u| u["id"] == json!(user_id))
        .and_then(|u| u["online_status"].as_bool())
        .unwrap_or(false)
}

async fn wait_for_flag(server: &TestServer, user: &User, expected: bool) {
    for _ in 0..100 {
        if online_flag(server, user, user.id).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("online flag never became {expected}");
}

/// Open the push channel and wait until the server has registered it.
async fn connect(server: &TestServer, user: &User) -> Socket {
    let mut request = format!("ws://{}/chat/ws", server.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("cookie", HeaderValue::from_str(&user.cookie).unwrap());
    let (socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    wait_for_flag(server, user, true).await;
    socket
}

async fn next_payload(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no frame in time")
            .expect("socket ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send(server: &TestServer, from: &User, to: Uuid, content: &str) -> reqwest::Response {
    from.http
        .post(server.url("/chat/messages"))
        .json(&json!({ "recipient_id": to, "content": content }))
        .send()
        .await
        .unwrap()
}

async fn history(server: &TestServer, viewer: &User, other: Uuid) -> Vec<Value> {
    viewer
        .http
        .get(server.url(&format!("/chat/messages/{other}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn message_to_offline_peer_is_stored_and_echoed() {
    let server = TestServer::start().await;
    let u1 = sign_up(&server, "alice", "alice@example.com").await;
    let u2 = sign_up(&server, "bobby", "bob@example.com").await;
    let mut socket = connect(&server, &u1).await;

    let resp = send(&server, &u1, u2.id, "hello").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["message"], "message saved");
    assert_eq!(body["content"], "hello");
    assert!(body["id"].is_string());
    assert!(body["created_at"].is_string());

    let echoed = next_payload(&mut socket).await;
    assert_eq!(echoed["id"], body["id"]);
    assert_eq!(echoed["sender_id"], json!(u1.id));
    assert_eq!(echoed["recipient_id"], json!(u2.id));

    let from_u1 = history(&server, &u1, u2.id).await;
    let from_u2 = history(&server, &u2, u1.id).await;
    assert_eq!(from_u1.len(), 1);
    assert_eq!(from_u1[0]["id"], body["id"]);
    assert_eq!(from_u1, from_u2);
}

#[tokio::test]
async fn live_recipient_receives_push() {
    let server = TestServer::start().await;
    let u1 = sign_up(&server, "alice", "alice@example.com").await;
    let u2 = sign_up(&server, "bobby", "bob@example.com").await;
    let mut s1 = connect(&server, &u1).await;
    let mut s2 = connect(&server, &u2).await;

    assert_eq!(send(&server, &u1, u2.id, "hi").await.status(), StatusCode::OK);

    for socket in [&mut s1, &mut s2] {
        let payload = next_payload(socket).await;
        assert_eq!(payload["sender_id"], json!(u1.id));
        assert_eq!(payload["recipient_id"], json!(u2.id));
        assert_eq!(payload["content"], "hi");
    }
}

#[tokio::test]
async fn closing_the_socket_clears_online_flag() {
    let server = TestServer::start().await;
    let u1 = sign_up(&server, "alice", "alice@example.com").await;
    let mut socket = connect(&server, &u1).await;

    socket.close(None).await.unwrap();

    wait_for_flag(&server, &u1, false).await;
}

#[tokio::test]
async fn shutdown_marks_connected_users_offline() {
    let server = TestServer::start().await;
    let u1 = sign_up(&server, "alice", "alice@example.com").await;
    let mut socket = connect(&server, &u1).await;

    server.shutdown.cancel();
    server.sessions.close();
    tokio::time::timeout(Duration::from_secs(5), server.sessions.wait())
        .await
        .expect("sessions did not drain");

    let users = db::list_users(&server.db_pool).await.unwrap();
    assert!(users.iter().all(|u| !u.online_status));
    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no close frame in time");
    assert!(matches!(frame, Some(Ok(Message::Close(_))) | None));
}

#[tokio::test]
async fn user_list_does_not_expose_emails() {
    let server = TestServer::start().await;
    let u1 = sign_up(&server, "alice", "alice@example.com").await;
    sign_up(&server, "bobby", "bob@example.com").await;

    let users: Vec<Value> = u1
        .http
        .get(server.url("/auth/users"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.get("email").is_none() && u["name"].is_string()));

    let me: Value = u1.http.get(server.url("/auth/me")).send().await.unwrap().json().await.unwrap();
    assert_eq!(me["email"], "alice@example.com");
}

#[tokio::test]
async fn socket_requires_login() {
    let server = TestServer::start().await;
    let request = format!("ws://{}/chat/ws", server.addr);
    assert!(tokio_tungstenite::connect_async(request).await.is_err());
}

#[tokio::test]
async fn inbound_socket_text_is_not_a_message() {
    let server = TestServer::start().await;
    let u1 = sign_up(&server, "alice", "alice@example.com").await;
    let u2 = sign_up(&server, "bobby", "bob@example.com").await;
    let mut socket = connect(&server, &u1).await;

    socket
        .send(Message::Text(json!({ "recipient_id": u2.id, "content": "sneaky" }).to_string().into()))
        .await
        .unwrap();
    assert_eq!(send(&server, &u1, u2.id, "real").await.status(), StatusCode::OK);

    let history = history(&server, &u1, u2.id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["content"], "real");
}

#[tokio::test]
async fn request_errors_map_to_statuses() {
    let server = TestServer::start().await;
    let u1 = sign_up(&server, "alice", "alice@example.com").await;

    let dup = u1
        .http
        .post(server.url("/auth/register"))
        .json(&json!({ "email": "alice@example.com", "password": "secret", "password_check": "secret", "name": "alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(dup.status(), StatusCode::CONFLICT);

    let wrong = reqwest::Client::new()
        .post(server.url("/auth/login"))
        .json(&json!({ "email": "alice@example.com", "password": "nope!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(send(&server, &u1, u1.id, "   ").await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(send(&server, &u1, Uuid::now_v7(), "hi").await.status(), StatusCode::NOT_FOUND);

    let anonymous = reqwest::Client::new()
        .post(server.url("/chat/messages"))
        .json(&json!({ "recipient_id": u1.id, "content": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
}
