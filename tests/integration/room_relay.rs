// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for joining rooms and relaying ciphertext.
//!
//! Drives a real relay server on an OS-assigned port with
//! `tokio-tungstenite` clients and checks:
//! - join notifications reach every member, including the joiner
//! - ciphertext is forwarded verbatim to everyone except the sender
//! - leave notifications reach only the remaining members
//! - malformed events are dropped without closing the connection
//!
//! Verification command: `cargo test --test room_relay`

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite;

use roomcast_proto::codec::{self, Frame};
use roomcast_relay::server::start_server;

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts a relay server on a random port for testing.
async fn start_relay() -> std::net::SocketAddr {
    let (addr, _handle) = start_server("127.0.0.1:0")
        .await
        .expect("failed to start test relay");
    addr
}

async fn connect(addr: std::net::SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

async fn emit(ws: &mut WsStream, event: &str, data: Value) {
    let text = json!({"event": event, "data": data}).to_string();
    ws.send(tungstenite::Message::Text(text.into()))
        .await
        .unwrap();
}

/// Receives the next event frame, failing the test after 5 seconds.
async fn recv(ws: &mut WsStream) -> Frame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if msg.is_text() || msg.is_binary() {
            return codec::decode(&msg.into_data()).unwrap();
        }
    }
}

/// Asserts that no event frame arrives within a short window.
async fn expect_silence(ws: &mut WsStream) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "expected no frame, got {result:?}");
}

async fn expect_system(ws: &mut WsStream, msg: &str) {
    let frame = recv(ws).await;
    assert_eq!(frame.event, "system");
    assert_eq!(frame.data["msg"], json!(msg));
}

async fn join(ws: &mut WsStream, username: &str, room: &str) {
    emit(ws, "join", json!({"username": username, "room": room})).await;
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn joiner_receives_own_join_notice() {
    let addr = start_relay().await;
    let mut a = connect(addr).await;

    join(&mut a, "A", "lobby").await;
    expect_system(&mut a, "A joined.").await;
}

#[tokio::test]
async fn lobby_scenario() {
    let addr = start_relay().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    join(&mut a, "A", "lobby").await;
    expect_system(&mut a, "A joined.").await;
    join(&mut b, "B", "lobby").await;
    expect_system(&mut a, "B joined.").await;
    expect_system(&mut b, "B joined.").await;

    emit(&mut a, "ciphertext", json!({"room": "lobby", "data": "xyz"})).await;

    let got = recv(&mut b).await;
    assert_eq!(got.event, "ciphertext");
    assert_eq!(Value::Object(got.data), json!({"room": "lobby", "data": "xyz"}));
    expect_silence(&mut a).await;

    drop(b);
    expect_system(&mut a, "B left.").await;
}

#[tokio::test]
async fn opaque_fields_are_forwarded_verbatim() {
    let addr = start_relay().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    join(&mut a, "A", "vault").await;
    expect_system(&mut a, "A joined.").await;
    join(&mut b, "B", "vault").await;
    expect_system(&mut b, "B joined.").await;

    let body = json!({
        "room": "vault",
        "ct": "3q2+7w==",
        "iv": "AAECAwQFBgcICQoL",
        "alg": "AES-GCM",
        "meta": {"v": 1, "chunks": [0, 1]},
    });
    emit(&mut b, "ciphertext", body.clone()).await;

    let got = recv(&mut a).await;
    assert_eq!(Value::Object(got.data), body);
}

#[tokio::test]
async fn ciphertext_stays_inside_its_room() {
    let addr = start_relay().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    join(&mut a, "A", "red").await;
    expect_system(&mut a, "A joined.").await;
    join(&mut b, "B", "red").await;
    expect_system(&mut b, "B joined.").await;
    expect_system(&mut a, "B joined.").await;
    join(&mut c, "C", "blue").await;
    expect_system(&mut c, "C joined.").await;

    emit(&mut a, "ciphertext", json!({"room": "red", "data": "r"})).await;

    assert_eq!(recv(&mut b).await.data["data"], json!("r"));
    expect_silence(&mut c).await;
    expect_silence(&mut a).await;
}

#[tokio::test]
async fn leave_notifies_remaining_members_only() {
    let addr = start_relay().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    join(&mut a, "A", "lobby").await;
    expect_system(&mut a, "A joined.").await;
    join(&mut b, "B", "lobby").await;
    expect_system(&mut a, "B joined.").await;
    expect_system(&mut b, "B joined.").await;

    emit(&mut b, "leave", json!({"username": "B", "room": "lobby"})).await;
    expect_system(&mut a, "B left.").await;
    expect_silence(&mut b).await;

    // B no longer receives the room's ciphertext.
    emit(&mut a, "ciphertext", json!({"room": "lobby", "data": "after"})).await;
    expect_silence(&mut b).await;
}

#[tokio::test]
async fn leave_without_membership_still_notifies_room() {
    let addr = start_relay().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    join(&mut a, "A", "lobby").await;
    expect_system(&mut a, "A joined.").await;

    emit(&mut b, "leave", json!({"username": "B", "room": "lobby"})).await;
    expect_system(&mut a, "B left.").await;
    expect_silence(&mut b).await;

    // A is still the only member: its ciphertext reaches nobody.
    emit(&mut a, "ciphertext", json!({"room": "lobby"})).await;
    expect_silence(&mut b).await;
}

#[tokio::test]
async fn malformed_events_are_dropped_silently() {
    let addr = start_relay().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    join(&mut b, "B", "lobby").await;
    expect_system(&mut b, "B joined.").await;

    a.send(tungstenite::Message::Text("{oops".into()))
        .await
        .unwrap();
    emit(&mut a, "join", json!({"room": "lobby"})).await;
    emit(&mut a, "join", json!({"username": "A"})).await;
    emit(&mut a, "leave", json!({"room": "lobby"})).await;
    emit(&mut a, "ciphertext", json!({"data": "no room"})).await;
    emit(&mut a, "system", json!({"msg": "spoofed", "room": "lobby"})).await;
    emit(&mut a, "rename", json!({"room": "lobby"})).await;

    expect_silence(&mut a).await;
    expect_silence(&mut b).await;

    // The connection survives and still works.
    join(&mut a, "A", "lobby").await;
    expect_system(&mut a, "A joined.").await;
    expect_system(&mut b, "A joined.").await;
}

#[tokio::test]
async fn binary_frames_are_accepted() {
    let addr = start_relay().await;
    let mut a = connect(addr).await;

    let bytes = json!({"event": "join", "data": {"username": "A", "room": "bin"}})
        .to_string()
        .into_bytes();
    a.send(tungstenite::Message::Binary(bytes.into()))
        .await
        .unwrap();

    expect_system(&mut a, "A joined.").await;
}
