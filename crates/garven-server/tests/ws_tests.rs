//! End-to-end tests: the real axum app on a loopback port, bot clusters played
//! by `tokio-tungstenite` clients and HTTP callers by `reqwest`.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use garven_cluster::{Envelope, IdentifyPacket};
use garven_server::{app, config::Config, AppState};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "s3cret";
const API_KEY: &str = "TEST";

async fn start_hub() -> (SocketAddr, AppState) {
    let config = Config {
        api_key:              Some(API_KEY.into()),
        secret_key:           SECRET.into(),
        request_timeout_secs: 2,
        cluster_count:        1,
        ..Config::default()
    };
    let state = AppState::new(config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, packet: IdentifyPacket) -> Socket {
    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let text = serde_json::to_string(&packet).unwrap();
    socket.send(Message::Text(text)).await.unwrap();
    socket
}

/// Read until a close frame arrives and return its code.
async fn close_code(socket: &mut Socket) -> u16 {
    let wait = async {
        while let Some(message) = socket.next().await {
            if let Message::Close(Some(frame)) = message.unwrap() {
                return u16::from(frame.code);
            }
        }
        panic!("socket ended without a close frame");
    };
    tokio::time::timeout(Duration::from_secs(5), wait).await.unwrap()
}

async fn wait_registered(state: &AppState, id: &str) {
    for _ in 0..100 {
        if state.hub.registry().contains(id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("cluster {id} never registered");
}

/// Answer every `guild_count` request with `guilds`.
fn serve_guild_count(mut socket: Socket, guilds: u64) {
    tokio::spawn(async move {
        while let Some(Ok(message)) = socket.next().await {
            let Message::Text(text) = message else { continue };
            if let Ok(Envelope::Request(request)) = Envelope::decode(text.as_bytes()) {
                let reply = match request.route.as_str() {
                    "guild_count" => Envelope::success(request.nonce, json!(guilds)),
                    other => Envelope::failure(request.nonce, format!("unknown route {other}")),
                };
                if socket.send(Message::Text(reply.to_text())).await.is_err() {
                    break;
                }
            }
        }
    });
}

#[tokio::test]
async fn wrong_secret_is_closed_with_4100() {
    let (addr, state) = start_hub().await;
    let mut socket = connect(addr, IdentifyPacket::new("1", "wrong")).await;

    assert_eq!(close_code(&mut socket).await, 4100);
    assert!(state.hub.registry().is_empty());
}

#[tokio::test]
async fn duplicate_without_override_is_closed_with_4102() {
    let (addr, state) = start_hub().await;
    let first = connect(addr, IdentifyPacket::new("1", SECRET)).await;
    wait_registered(&state, "1").await;
    let session = state.hub.registry().get("1").unwrap().session();

    let mut second = connect(addr, IdentifyPacket::new("1", SECRET)).await;
    assert_eq!(close_code(&mut second).await, 4102);

    assert_eq!(state.hub.registry().get("1").unwrap().session(), session);
    drop(first);
}

#[tokio::test]
async fn guild_count_is_gathered_from_a_live_cluster() {
    let (addr, state) = start_hub().await;
    let socket = connect(addr, IdentifyPacket::new("1", SECRET)).await;
    wait_registered(&state, "1").await;
    serve_guild_count(socket, 42);

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/aggregate/guilds/count");

    let body: Value = client
        .get(&url)
        .header("X-API-KEY", API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"statistic": 42, "partial_response": false}));

    let rejected = client.get(&url).send().await.unwrap();
    assert_eq!(rejected.status(), reqwest::StatusCode::FORBIDDEN);
    let message: Value = rejected.json().await.unwrap();
    assert_eq!(message["message"], "missing X-API-KEY header");
}

#[tokio::test]
async fn health_is_open_and_counts_clusters() {
    let (addr, state) = start_hub().await;
    let _socket = connect(addr, IdentifyPacket::new("7", SECRET)).await;
    wait_registered(&state, "7").await;

    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connected_clusters"], 1);
}

#[tokio::test]
async fn notify_unknown_cluster_is_503() {
    let (addr, _state) = start_hub().await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/cluster/9/notify"))
        .header("X-API-KEY", API_KEY)
        .json(&json!({"message": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn shard_info_rejects_bad_guild_id() {
    let (addr, _state) = start_hub().await;
    let client = reqwest::Client::new();

    let ok: Value = client
        .get(format!("http://{addr}/aggregate/guilds/1/shard_info"))
        .header("X-API-KEY", API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ok, json!({"shard_id": "0", "cluster_id": "1"}));

    let bad = client
        .get(format!("http://{addr}/aggregate/guilds/abc/shard_info"))
        .header("X-API-KEY", API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn closing_socket_removes_cluster() {
    let (addr, state) = start_hub().await;
    let mut socket = connect(addr, IdentifyPacket::new("3", SECRET)).await;
    wait_registered(&state, "3").await;

    socket.close(None).await.unwrap();
    for _ in 0..100 {
        if !state.hub.registry().contains("3") {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("cluster 3 was not removed after closing");
}
