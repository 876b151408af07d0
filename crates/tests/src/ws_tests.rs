use crate::fixtures::test_app::TestApp;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const AUDIO: &[u8] = b"testing the push channel\n";

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(app: &TestApp) -> Socket {
    let (socket, _) = connect_async(app.ws_url()).await.unwrap();
    socket
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(10), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn watch(socket: &mut Socket, task_id: &str) {
    let frame = serde_json::json!({ "taskId": task_id }).to_string();
    socket.send(Message::text(frame)).await.unwrap();
}

#[tokio::test]
async fn streams_snapshots_until_terminal() {
    let app = TestApp::spawn().await;
    let task_id = app.submit_ok(AUDIO, None).await;

    let mut socket = connect(&app).await;
    watch(&mut socket, &task_id).await;

    let mut progress = Vec::new();
    let last = loop {
        let msg = next_json(&mut socket).await;
        assert_eq!(msg["type"], "task:status");
        assert_eq!(msg["data"]["task_id"], task_id.as_str());
        progress.push(msg["data"]["progress"].as_f64().unwrap());
        if msg["data"]["status"] != "PROCESSING" {
            break msg;
        }
    };

    assert_eq!(last["data"]["status"], "SUCCESS");
    assert_eq!(last["data"]["result"]["text"], "testing the push channel.");
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    app.shutdown().await;
}

#[tokio::test]
async fn terminal_task_is_answered_once() {
    let app = TestApp::spawn().await;
    let task_id = app.submit_ok(AUDIO, None).await;
    app.wait_for_terminal(&task_id).await;

    let mut socket = connect(&app).await;
    watch(&mut socket, &task_id).await;
    let msg = next_json(&mut socket).await;
    assert_eq!(msg["data"]["status"], "SUCCESS");
    assert_eq!(msg["data"]["progress"], 100.0);
    app.shutdown().await;
}

#[tokio::test]
async fn unknown_task_and_bad_frames_get_errors() {
    let app = TestApp::spawn().await;
    let mut socket = connect(&app).await;

    watch(&mut socket, "missing").await;
    let msg = next_json(&mut socket).await;
    assert_eq!(msg["type"], "error");
    assert_eq!(msg["message"], "Unknown task missing");

    socket.send(Message::text("not json")).await.unwrap();
    let msg = next_json(&mut socket).await;
    assert_eq!(msg["type"], "error");
    app.shutdown().await;
}

#[tokio::test]
async fn latest_session_takes_over_a_task() {
    let app = TestApp::spawn().await;
    let task_id = app.submit_ok(AUDIO, None).await;

    let mut first = connect(&app).await;
    let mut second = connect(&app).await;
    watch(&mut first, &task_id).await;
    next_json(&mut first).await;
    watch(&mut second, &task_id).await;

    let last = loop {
        let msg = next_json(&mut second).await;
        if msg["data"]["status"] != "PROCESSING" {
            break msg;
        }
    };
    assert_eq!(last["data"]["status"], "SUCCESS");
    app.shutdown().await;
}
