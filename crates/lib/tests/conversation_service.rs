//! Integration test: run a local stand-in for the training service (HTTP API + Socket.IO over
//! websocket) on a free port and drive the real client against it.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use lib::api::ApiClient;
use lib::auth::{self, AuthError, LoginOutcome};
use lib::config::{RetryConfig, SessionConfig};
use lib::conversation::{Author, ChannelOptions, ConversationChannel};
use lib::credentials::{Credentials, SessionIdentity};
use lib::socket::packet::{EnginePacket, SocketPacket};
use lib::socket::{ClientEvent, ServerEvent};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;

const NARRATIVE: &str = "Jane Doe is a 63 year old woman with two hours of chest pain.";

#[derive(Default)]
struct Service {
    users: Mutex<HashMap<String, String>>,
    received: Mutex<Vec<ClientEvent>>,
    identities: Mutex<Vec<(String, String)>>,
}

type Shared = Arc<Service>;

async fn patient_details(Path(id): Path<u64>) -> Response {
    if id != 42 {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({"id": 42, "name": "Jane Doe", "age": 63})).into_response()
}

async fn patient_narrative(Path(id): Path<u64>) -> Response {
    if id != 42 {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(NARRATIVE).into_response()
}

async fn list_patients() -> Json<serde_json::Value> {
    Json(json!([
        {"id": 42, "name": "Jane Doe", "age": 63, "gender": "female", "symptoms": "chest pain"},
        {"id": 7, "name": "John Roe", "age": "41", "gender": "male"}
    ]))
}

async fn get_user(State(svc): State<Shared>, Path(email): Path<String>) -> Response {
    match svc.users.lock().unwrap().get(&email) {
        Some(password) => Json(json!({"email": email, "password": password})).into_response(),
        None => (StatusCode::NOT_FOUND, "no such user").into_response(),
    }
}

async fn create_user(State(svc): State<Shared>, Json(body): Json<serde_json::Value>) -> Response {
    let email = body["email"].as_str().unwrap_or_default().to_string();
    let password = body["password"].as_str().unwrap_or_default().to_string();
    let mut users = svc.users.lock().unwrap();
    if users.contains_key(&email) {
        return (StatusCode::BAD_REQUEST, "user already exists").into_response();
    }
    users.insert(email, password);
    StatusCode::CREATED.into_response()
}

async fn socket_io(
    State(svc): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    svc.identities.lock().unwrap().push((
        query.get("userEmail").cloned().unwrap_or_default(),
        query.get("patientId").cloned().unwrap_or_default(),
    ));
    ws.on_upgrade(move |socket| handle_socket(socket, svc))
}

async fn handle_socket(mut socket: WebSocket, svc: Shared) {
    let open = r#"0{"sid":"test-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
    if socket.send(Message::Text(open.to_string())).await.is_err() {
        return;
    }
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let Ok(EnginePacket::Message(inner)) = EnginePacket::decode(&text) else {
            continue;
        };
        let reply = match SocketPacket::decode(&inner) {
            Ok(SocketPacket::Connect { .. }) => Some(r#"40{"sid":"socket-sid"}"#.to_string()),
            Ok(SocketPacket::Event { data, .. }) => {
                let Ok(event) = ClientEvent::from_event_data(&data) else {
                    continue;
                };
                let answer = match &event {
                    ClientEvent::StartConversation(_) => "Hello doctor.".to_string(),
                    ClientEvent::ChatMessage(m) => format!("About \"{}\": since this morning.", m.message),
                };
                svc.received.lock().unwrap().push(event);
                Some(ServerEvent::AssistantResponse(answer).to_packet().to_engine_frame())
            }
            Ok(SocketPacket::Disconnect { .. }) => break,
            _ => None,
        };
        if let Some(reply) = reply {
            if socket.send(Message::Text(reply)).await.is_err() {
                break;
            }
        }
    }
}

async fn start_service() -> (String, Shared) {
    let svc = Shared::default();
    svc.users
        .lock()
        .unwrap()
        .insert("doc@example.com".to_string(), "secret".to_string());
    let app = Router::new()
        .route("/api/patient/:id", get(patient_details))
        .route("/api/patients/:id", get(patient_narrative))
        .route("/api/patients", get(list_patients))
        .route("/api/users/:email", get(get_user))
        .route("/api/users", axum::routing::post(create_user))
        .route("/socket.io/", get(socket_io))
        .with_state(svc.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let port = listener.local_addr().expect("local_addr").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://127.0.0.1:{}", port), svc)
}

fn temp_credentials_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("oncourse-test-{}", uuid::Uuid::new_v4()))
        .join("credentials.json")
}

fn channel_options(base_url: &str) -> ChannelOptions {
    ChannelOptions {
        base_url: base_url.to_string(),
        socket_path: "/socket.io".to_string(),
        session: SessionConfig {
            fetch_timeout_ms: 2_000,
            connect_timeout_ms: 2_000,
            retry: RetryConfig {
                max_attempts: 3,
                initial_backoff_ms: 20,
                max_backoff_ms: 100,
            },
        },
    }
}

async fn drive_until(channel: &mut ConversationChannel, done: impl Fn(&ConversationChannel) -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done(channel) {
            assert!(channel.next_event().await, "channel closed early");
        }
    })
    .await
    .expect("condition not reached within 10s");
}

#[tokio::test]
async fn handshake_fires_once_and_replies_are_relayed_in_order() {
    let (base_url, svc) = start_service().await;
    let identity = SessionIdentity::new("doc@example.com", 42).unwrap();
    let api = Arc::new(ApiClient::new(base_url.clone()));
    let mut channel =
        ConversationChannel::open(identity, api, channel_options(&base_url), Handle::current())
            .unwrap();

    drive_until(&mut channel, |c| c.transcript().len() == 1).await;
    assert_eq!(channel.summary().unwrap().narrative, NARRATIVE);
    assert!(channel.session().handshake().is_sent());
    let first = channel.transcript().last().unwrap();
    assert_eq!(first.author(), Author::Assistant);
    assert_eq!(first.text(), "Hello doctor.");

    assert!(channel.send_user_message("When did it start?"));
    assert_eq!(channel.transcript().len(), 2);
    drive_until(&mut channel, |c| c.transcript().len() == 3).await;

    let authors: Vec<Author> = channel.transcript().iter().map(|m| m.author()).collect();
    assert_eq!(authors, vec![Author::Assistant, Author::User, Author::Assistant]);
    assert_eq!(
        channel.transcript().last().unwrap().text(),
        "About \"When did it start?\": since this morning."
    );

    let received = svc.received.lock().unwrap().clone();
    assert_eq!(received.len(), 2);
    let ClientEvent::StartConversation(start) = &received[0] else {
        panic!("expected start_conversation first, got {:?}", received[0]);
    };
    assert_eq!(start.patient_natural_language_details, NARRATIVE);
    assert_eq!(start.user_email, "doc@example.com");
    assert_eq!(start.patient_id, 42);
    let ClientEvent::ChatMessage(chat) = &received[1] else {
        panic!("expected chat_message, got {:?}", received[1]);
    };
    assert_eq!(chat.message, "When did it start?");
    assert_eq!(
        svc.identities.lock().unwrap()[0],
        ("doc@example.com".to_string(), "42".to_string())
    );

    channel.close();
    assert!(!channel.next_event().await);
    assert_eq!(channel.transcript().len(), 3);
}

#[tokio::test]
async fn unknown_patient_degrades_and_never_handshakes() {
    let (base_url, svc) = start_service().await;
    let identity = SessionIdentity::new("doc@example.com", 99).unwrap();
    let api = Arc::new(ApiClient::new(base_url.clone()));
    let mut channel =
        ConversationChannel::open(identity, api, channel_options(&base_url), Handle::current())
            .unwrap();

    drive_until(&mut channel, |c| {
        c.session().is_connected()
            && matches!(
                c.session().failure(),
                Some(lib::conversation::SessionFailure::Summary { gave_up: true, .. })
            )
    })
    .await;
    assert!(channel.summary().is_none());
    assert!(channel.transcript().is_empty());
    assert!(!channel.session().handshake().is_sent());
    assert!(svc.received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn login_register_and_stored_login() {
    let (base_url, _svc) = start_service().await;
    let api = ApiClient::new(base_url);
    let path = temp_credentials_path();

    assert!(matches!(
        auth::login(&api, &path, "", "secret").await,
        Err(AuthError::MissingFields)
    ));
    assert_eq!(
        auth::login(&api, &path, "doc@example.com", "wrong").await.unwrap(),
        LoginOutcome::WrongPassword
    );
    assert_eq!(
        auth::login(&api, &path, "new@example.com", "pw").await.unwrap(),
        LoginOutcome::NotRegistered
    );
    assert!(Credentials::load(&path).is_none());

    let outcome = auth::login(&api, &path, "doc@example.com", "secret").await.unwrap();
    assert_eq!(
        outcome,
        LoginOutcome::LoggedIn(Credentials::new("doc@example.com", "secret"))
    );
    let stored = auth::check_stored_login(&api, &path).await.unwrap();
    assert_eq!(stored.unwrap().user_email, "doc@example.com");

    let creds = auth::register(&api, &path, "new@example.com", "pw").await.unwrap();
    assert_eq!(creds.user_email, "new@example.com");
    assert!(matches!(
        auth::register(&api, &path, "new@example.com", "pw").await,
        Err(AuthError::Registration(body)) if body.contains("already exists")
    ));

    // Reserved characters in the email stay inside one path segment.
    auth::register(&api, &path, "ward 7/b@example.com", "pw").await.unwrap();
    assert_eq!(
        auth::login(&api, &path, "ward 7/b@example.com", "pw").await.unwrap(),
        LoginOutcome::LoggedIn(Credentials::new("ward 7/b@example.com", "pw"))
    );

    auth::logout(&path).unwrap();
    assert!(auth::check_stored_login(&api, &path).await.unwrap().is_none());

    // A stored login the service no longer knows is cleared.
    Credentials::new("ghost@example.com", "pw").save(&path).unwrap();
    assert!(auth::check_stored_login(&api, &path).await.unwrap().is_none());
    assert!(!path.exists());
}

#[tokio::test]
async fn patient_list_and_narrative() {
    let (base_url, _svc) = start_service().await;
    let api = ApiClient::new(base_url);

    let patients = api.list_patients().await.unwrap();
    assert_eq!(patients.len(), 2);
    assert_eq!(patients[0].name, "Jane Doe");
    assert_eq!(patients[1].age, "41");
    assert_eq!(patients[1].symptoms, "");

    assert_eq!(api.patient_narrative(42).await.unwrap(), NARRATIVE);
    let err = api.patient_details(99).await.unwrap_err();
    assert!(err.is_status());
}
