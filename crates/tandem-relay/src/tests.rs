//! Drives the real router over TCP with WebSocket and HTTP clients.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tandem_config::RelayConfig;
use tandem_signal::{ChannelRegistry, PairingEngine};

use crate::app::{router, AppState};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(config: RelayConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(PairingEngine::new(ChannelRegistry::new()), config);
    tokio::spawn(async move {
        axum::serve(
            listener,
            router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn open(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws/signaling"))
        .await
        .unwrap();
    ws
}

/// Next JSON frame, failing the test if none arrives promptly.
async fn recv(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn health(addr: SocketAddr) -> Value {
    reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn banner_and_health() {
    let addr = spawn_server(RelayConfig::default()).await;

    let banner: Value = reqwest::get(format!("http://{addr}/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(banner["status"], "running");

    assert_eq!(
        health(addr).await,
        json!({"status": "ok", "onlineCount": 0, "sessions": 0, "waiting": 0, "pairs": 0})
    );
}

#[tokio::test]
async fn end_to_end_signaling() {
    let addr = spawn_server(RelayConfig::default()).await;

    let mut a = open(addr).await;
    let connected = recv(&mut a).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["onlineCount"], 1);
    let a_id = connected["userId"].as_str().unwrap().to_string();
    assert_eq!(recv(&mut a).await["type"], "waiting");

    let mut b = open(addr).await;
    let connected = recv(&mut b).await;
    let b_id = connected["userId"].as_str().unwrap().to_string();
    // Both clients share the loopback address.
    assert_eq!(connected["onlineCount"], 1);

    let b_matched = recv(&mut b).await;
    assert_eq!(b_matched["type"], "matched");
    assert_eq!(b_matched["partnerId"], a_id.as_str());
    assert_eq!(b_matched["shouldCreateOffer"], true);

    let a_matched = recv(&mut a).await;
    assert_eq!(a_matched["partnerId"], b_id.as_str());
    assert_eq!(a_matched["shouldCreateOffer"], false);

    send(&mut a, json!({"type": "offer", "sdp": "x"})).await;
    assert_eq!(
        recv(&mut b).await,
        json!({"type": "offer", "sdp": "x", "from": a_id})
    );

    send(&mut b, json!({"type": "answer", "sdp": "y"})).await;
    assert_eq!(
        recv(&mut a).await,
        json!({"type": "answer", "sdp": "y", "from": b_id})
    );

    send(&mut b, json!({"type": "next"})).await;
    assert_eq!(recv(&mut a).await["type"], "partner-next");
    assert_eq!(recv(&mut b).await["type"], "waiting");

    b.close(None).await.unwrap();
    // Let the server process the close.
    for _ in 0..50 {
        if health(addr).await["sessions"] == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let stats = health(addr).await;
    assert_eq!(stats["sessions"], 1);
    assert_eq!(stats["waiting"], 0);
}

#[tokio::test]
async fn partner_disconnect_is_reported() {
    let addr = spawn_server(RelayConfig::default()).await;

    let mut a = open(addr).await;
    recv(&mut a).await;
    recv(&mut a).await;
    let mut b = open(addr).await;
    recv(&mut b).await;
    recv(&mut b).await;
    recv(&mut a).await;

    drop(b);
    assert_eq!(recv(&mut a).await["type"], "partner-disconnected");
}

#[tokio::test]
async fn disallowed_origin_is_forbidden() {
    let config = RelayConfig {
        allowed_origins: vec!["https://chat.example.com".into()],
        ..Default::default()
    };
    let addr = spawn_server(config).await;
    let url = format!("ws://{addr}/ws/signaling");

    let mut request = url.clone().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", HeaderValue::from_static("https://evil.example.com"));
    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        other => panic!("expected 403, got {:?}", other.err()),
    }

    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", HeaderValue::from_static("https://chat.example.com"));
    let (mut ws, response) = connect_async(request).await.unwrap();
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://chat.example.com"
    );
    assert_eq!(recv(&mut ws).await["type"], "connected");
}

#[tokio::test]
async fn preflight_gets_no_content() {
    let addr = spawn_server(RelayConfig::default()).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("http://{addr}/health"))
        .header("origin", "https://chat.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 204);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(response
        .headers()
        .get("access-control-allow-credentials")
        .is_none());
}

#[tokio::test]
async fn explicit_origin_allows_credentials() {
    let config = RelayConfig {
        allowed_origins: vec!["https://chat.example.com".into()],
        ..Default::default()
    };
    let addr = spawn_server(config).await;
    let client = reqwest::Client::new();

    let response = client
        .request(reqwest::Method::OPTIONS, format!("http://{addr}/health"))
        .header("origin", "https://chat.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://chat.example.com"
    );
    assert_eq!(response.headers()["access-control-allow-credentials"], "true");

    let response = client
        .get(format!("http://{addr}/health"))
        .header("origin", "https://other.example.com")
        .send()
        .await
        .unwrap();
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());
    assert!(response
        .headers()
        .get("access-control-allow-credentials")
        .is_none());
}

#[tokio::test]
async fn idle_connection_is_closed() {
    let config = RelayConfig {
        idle_timeout_secs: 1,
        ..Default::default()
    };
    let addr = spawn_server(config).await;

    let mut ws = open(addr).await;
    recv(&mut ws).await;
    recv(&mut ws).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server did not close idle connection");
    assert_eq!(health(addr).await["sessions"], 0);
}

#[test]
fn flags_override_loaded_config() {
    use clap::Parser;

    let mut config = RelayConfig {
        port: 9000,
        channel_capacity: 32,
        ..Default::default()
    };
    let args = crate::Args::try_parse_from([
        "tandem-relay",
        "--port",
        "9100",
        "--allowed-origins",
        "https://a.example,https://b.example",
        "--idle-timeout",
        "60",
    ])
    .unwrap();
    args.apply(&mut config);

    assert_eq!(config.port, 9100);
    assert_eq!(
        config.allowed_origins,
        vec!["https://a.example".to_string(), "https://b.example".to_string()]
    );
    assert_eq!(config.idle_timeout_secs, 60);
    // Untouched fields keep their loaded values.
    assert_eq!(config.channel_capacity, 32);
}
