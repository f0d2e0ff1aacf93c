//! End-to-end tests against a local tokio-tungstenite server

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;

use scriptlink_core::transport::reconnect_config;
use scriptlink_core::{Client, ClientConfig, ConnectionState, Message};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as Frame;

const WAIT: Duration = Duration::from_secs(5);

const STATUS_FRAME: &str = r#"{"type":"script_status","data":{"script_name":"backup","status":"completed","exit_code":0,"duration":1200},"timestamp":"2024-01-01T00:00:00Z"}"#;

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    (listener, url)
}

#[tokio::test]
async fn test_receive_and_send_over_websocket() {
    let (listener, url) = listen().await;
    let (server_tx, mut server_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Frame::Text(STATUS_FRAME.into())).await.unwrap();
        while let Some(Ok(frame)) = ws.next().await {
            if let Frame::Text(text) = frame {
                let _ = server_tx.send(text.to_string());
            }
        }
    });

    let client = Client::new(ClientConfig::with_url(url)).unwrap();
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Message>();
    client.on("script_status", move |m| {
        let _ = msg_tx.send(m.clone());
    });
    client.connect(None);

    let msg = timeout(WAIT, msg_rx.recv()).await.unwrap().unwrap();
    assert_eq!(msg.data["script_name"], "backup");
    assert!(client.is_connected());
    assert_eq!(client.last_message(), Some(msg));

    assert!(client.send(&json!({"type": "hello", "data": {}})));
    let received = timeout(WAIT, server_rx.recv()).await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&received).unwrap();
    assert_eq!(value["type"], "hello");

    client.dispose();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_reconnects_after_abrupt_drop() {
    let (listener, url) = listen().await;

    tokio::spawn(async move {
        // First connection: complete the handshake, then vanish without a close frame
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Frame::Text(STATUS_FRAME.into())).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let config = ClientConfig::with_url(url).with_reconnect(reconnect_config(
        Duration::from_millis(200),
        Duration::from_millis(20),
        Some(5),
    ));
    let client = Client::new(config).unwrap();
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Message>();
    client.on("*", move |m| {
        let _ = msg_tx.send(m.clone());
    });
    client.connect(None);

    let msg = timeout(WAIT, msg_rx.recv()).await.unwrap().unwrap();
    assert_eq!(msg.kind, "script_status");
    assert!(client.is_connected());
    assert_eq!(client.attempt_count(), 0);

    client.dispose();
}

#[tokio::test]
async fn test_server_close_frame_is_clean_and_terminal() {
    let (listener, url) = listen().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}

        // A reconnect would land here
        let _ = timeout(Duration::from_secs(2), listener.accept()).await;
    });

    let client = Client::new(ClientConfig::with_url(url)).unwrap();
    let mut status = client.watch_status();
    client.connect(None);

    timeout(WAIT, status.wait_for(|s| s.state == ConnectionState::Closed))
        .await
        .unwrap()
        .unwrap();
    assert!(!client.is_connected());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.attempt_count(), 0);
}

#[tokio::test]
async fn test_dispose_sends_normal_close() {
    let (listener, url) = listen().await;
    let (code_tx, mut code_rx) = mpsc::unbounded_channel::<u16>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(frame)) = ws.next().await {
            if let Frame::Close(Some(close)) = frame {
                let _ = code_tx.send(u16::from(close.code));
            }
        }
    });

    let client = Client::new(ClientConfig::with_url(url)).unwrap();
    let mut status = client.watch_status();
    client.connect(None);
    timeout(WAIT, status.wait_for(|s| s.is_connected))
        .await
        .unwrap()
        .unwrap();

    client.dispose();
    let code = timeout(WAIT, code_rx.recv()).await.unwrap().unwrap();
    assert_eq!(code, 1000);
}

#[tokio::test]
async fn test_refused_connection_retries_then_gives_up() {
    let (listener, url) = listen().await;
    drop(listener);

    let config = ClientConfig::with_url(url).with_reconnect(reconnect_config(
        Duration::from_millis(10),
        Duration::from_millis(5),
        Some(2),
    ));
    let client = Client::new(config).unwrap();
    let mut status = client.watch_status();
    client.connect(None);

    timeout(
        WAIT,
        status.wait_for(|s| s.state == ConnectionState::Closed && s.attempt_count == 2),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(!client.is_connected());
    assert!(client.last_error().is_some());
}
