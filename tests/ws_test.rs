//! End-to-end: session login, room creation, invites, and WebSocket fan-out
//! through the real router.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use reqwest::{header, StatusCode};
use roomcast::{
    app,
    connections::ConnectionRegistry,
    db,
    ids::IdGenerator,
    message_log::SqliteLog,
    rooms::{RoomDirectory, RoomSettings},
    store::SqliteStore,
    AppState,
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> SocketAddr {
    let db_pool = db::connect_in_memory().await.unwrap();
    let directory = RoomDirectory::new(
        Arc::new(IdGenerator::new(1)),
        Arc::new(SqliteLog::new(db_pool.clone())),
        Arc::new(SqliteStore::new(db_pool)),
        ConnectionRegistry::new(),
        RoomSettings::default(),
    );
    directory.bootstrap().await.unwrap();

    let app = app(AppState { directory }, time::Duration::minutes(5));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct User {
    addr: SocketAddr,
    http: reqwest::Client,
    cookie: String,
}

impl User {
    async fn login(addr: SocketAddr, user_id: &str) -> Self {
        let http = reqwest::Client::new();
        let res = http
            .post(format!("http://{addr}/api/login"))
            .form(&[("user_id", user_id)])
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let cookie = res
            .headers()
            .get(header::SET_COOKIE)
            .expect("session cookie")
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_owned();
        Self { addr, http, cookie }
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> reqwest::Response {
        self.http
            .post(format!("http://{}{path}", self.addr))
            .header(header::COOKIE, &self.cookie)
            .form(form)
            .send()
            .await
            .unwrap()
    }

    async fn connect(&self) -> Socket {
        let mut request = format!("ws://{}/api/ws", self.addr).into_client_request().unwrap();
        request
            .headers_mut()
            .insert("cookie", self.cookie.parse().unwrap());
        let (socket, _) = connect_async(request).await.unwrap();
        socket
    }
}

async fn say(socket: &mut Socket, room: &str, message: &str) {
    let frame = json!({ "ChatroomName": room, "Message": message }).to_string();
    socket.send(Message::Text(frame.into())).await.unwrap();
}

async fn next_message(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame in time")
            .expect("socket open")
            .expect("valid frame");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Sends `message` and waits for it to come back, which proves the socket is
/// attached to `room`.
async fn say_and_echo(socket: &mut Socket, room: &str, message: &str) {
    say(socket, room, message).await;
    loop {
        if next_message(socket).await["Content"] == message {
            return;
        }
    }
}

#[tokio::test]
async fn messages_fan_out_to_every_member() {
    let addr = start_server().await;

    let alice = User::login(addr, "alice").await;
    let res = alice.post("/api/room/create", &[("chatroom_name", "general")]).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(res.json::<String>().await.unwrap(), "general");

    let mut alice_ws = alice.connect().await;
    say_and_echo(&mut alice_ws, "general", "alice here").await;

    let res = alice
        .post("/api/room/invite", &[("chatroom_name", "general"), ("invite_timelimit", "1 day")])
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let code: String = res.json().await.unwrap();

    let bob = User::login(addr, "bob").await;
    let res = bob.post(&format!("/api/room/join/{code}"), &[]).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert_eq!(res.json::<String>().await.unwrap(), "general");

    let mut bob_ws = bob.connect().await;
    say_and_echo(&mut bob_ws, "general", "bob here").await;
    assert_eq!(next_message(&mut alice_ws).await["Content"], "bob here");

    say(&mut alice_ws, "general", "hi").await;
    let to_alice = next_message(&mut alice_ws).await;
    let to_bob = next_message(&mut bob_ws).await;
    assert_eq!(to_alice, to_bob);
    assert_eq!(to_bob["ChatroomName"], "general");
    assert_eq!(to_bob["UserId"], "alice");
    assert_eq!(to_bob["Content"], "hi");
    assert!(to_bob["Timestamp"].as_str().unwrap().ends_with('Z'));

    let res = alice.post("/api/room/messages", &[("chatroom_name", "general")]).await;
    assert_eq!(res.status(), StatusCode::OK);
    let history: Vec<Value> = res.json().await.unwrap();
    let contents: Vec<_> = history.iter().map(|m| m["Content"].as_str().unwrap()).collect();
    assert_eq!(contents, vec!["hi", "bob here", "alice here"]);

    let res = bob.post("/api/user/chatrooms", &[]).await;
    assert_eq!(
        res.json::<Value>().await.unwrap(),
        json!({ "name": "bob", "chatrooms": ["general"], "current_room": "general" })
    );
}

#[tokio::test]
async fn malformed_frame_closes_the_socket() {
    let addr = start_server().await;
    let alice = User::login(addr, "alice").await;
    alice.post("/api/room/create", &[("chatroom_name", "general")]).await;

    let mut socket = alice.connect().await;
    socket.send(Message::Text("definitely not json".into())).await.unwrap();

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "socket stayed open");
}

#[tokio::test]
async fn http_errors_map_to_statuses() {
    let addr = start_server().await;

    let anonymous = reqwest::Client::new()
        .post(format!("http://{addr}/api/room/create"))
        .form(&[("chatroom_name", "general")])
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let alice = User::login(addr, "alice").await;
    assert_eq!(
        alice.post("/api/room/create", &[("chatroom_name", "abc")]).await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        alice.post("/api/room/create", &[("chatroom_name", "general")]).await.status(),
        StatusCode::CREATED
    );
    assert_eq!(
        alice.post("/api/room/create", &[("chatroom_name", "general")]).await.status(),
        StatusCode::CONFLICT
    );
    assert_eq!(
        alice
            .post("/api/room/invite", &[("chatroom_name", "general"), ("invite_timelimit", "1 year")])
            .await
            .status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        alice.post("/api/room/join/nosuchcode", &[]).await.status(),
        StatusCode::NOT_FOUND
    );

    let res = alice.post("/api/room/messages", &[]).await;
    assert_eq!(res.json::<Vec<Value>>().await.unwrap(), Vec::<Value>::new());

    let bob = User::login(addr, "bob").await;
    assert_eq!(
        bob.post("/api/room/messages", &[("chatroom_name", "general")]).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        bob.post("/api/room/invite", &[("chatroom_name", "general"), ("invite_timelimit", "1 day")])
            .await
            .status(),
        StatusCode::FORBIDDEN
    );
}
