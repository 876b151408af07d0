use crate::fixtures::fakes::{CORRUPT, MISSING_MODEL, MODEL};
use crate::fixtures::test_app::TestApp;
use serde_json::Value;

const AUDIO: &[u8] = b"hello world\nhow are you\n";

#[tokio::test]
async fn submission_completes_with_restored_text() {
    let app = TestApp::spawn().await;
    let task_id = app.submit_ok(AUDIO, Some("docx")).await;

    let json = app.wait_for_terminal(&task_id).await;
    assert_eq!(json["status"], "SUCCESS");
    assert_eq!(json["progress"], 100.0);
    assert_eq!(json["result"]["text"], "hello world how are you.");
    assert_eq!(json["result"]["restored"], true);

    let segments = json["result"]["segments"].as_array().unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0]["text"], "hello world");
    assert_eq!(segments[1]["start_time"], 1.0);
    assert_eq!(segments[1]["end_time"], 2.5);

    assert_eq!(
        json["download_url"],
        format!("{}/files/{}_output.docx", app.base_url, task_id)
    );
    assert!(json["finish_time"].is_string());
    app.shutdown().await;
}

#[tokio::test]
async fn format_defaults_to_configured_value() {
    let app = TestApp::spawn().await;
    let task_id = app.submit_ok(AUDIO, None).await;

    let json = app.wait_for_terminal(&task_id).await;
    assert!(json["download_url"].as_str().unwrap().ends_with("_output.txt"));
    app.shutdown().await;
}

#[tokio::test]
async fn segments_can_be_excluded() {
    let app = TestApp::spawn().await;
    let form = reqwest::multipart::Form::new()
        .part(
            "file",
            reqwest::multipart::Part::bytes(AUDIO.to_vec()).file_name("a.wav"),
        )
        .text("model", MODEL)
        .text("include_segments", "false");
    let resp = app
        .client
        .post(app.url("/api/transcription"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let task_id = resp.json::<Value>().await.unwrap()["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let json = app.wait_for_terminal(&task_id).await;
    assert_eq!(json["status"], "SUCCESS");
    assert!(json["result"].get("segments").is_none());
    app.shutdown().await;
}

#[tokio::test]
async fn concurrent_submissions_all_finish() {
    let app = TestApp::spawn().await;
    let mut ids = Vec::new();
    for i in 0..5 {
        let audio = format!("clip number {}\n", i);
        ids.push(app.submit_ok(audio.as_bytes(), None).await);
    }

    for (i, task_id) in ids.iter().enumerate() {
        let json = app.wait_for_terminal(task_id).await;
        assert_eq!(json["status"], "SUCCESS");
        assert_eq!(json["result"]["text"], format!("clip number {}.", i));
    }
    app.shutdown().await;
}

#[tokio::test]
async fn rejects_invalid_submissions_up_front() {
    let app = TestApp::spawn().await;

    let resp = app.submit(None, Some(MODEL), None).await;
    assert_eq!(resp.status().as_u16(), 400);

    let resp = app.submit(Some(AUDIO), None, None).await;
    assert_eq!(resp.status().as_u16(), 400);

    let resp = app.submit(Some(b""), Some(MODEL), None).await;
    assert_eq!(resp.status().as_u16(), 422);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["error"], "validation");

    let resp = app.submit(Some(AUDIO), Some("klingon"), None).await;
    assert_eq!(resp.status().as_u16(), 422);

    let resp = app.submit(Some(AUDIO), Some(MISSING_MODEL), None).await;
    assert_eq!(resp.status().as_u16(), 422);

    let resp = app.submit(Some(AUDIO), Some(MODEL), Some("odt")).await;
    assert_eq!(resp.status().as_u16(), 422);

    assert!(app.repo.is_empty());
    app.shutdown().await;
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let app = TestApp::spawn().await;

    let resp = app.task_status("does-not-exist").await;
    assert_eq!(resp.status().as_u16(), 404);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["error"], "not_found");
    app.shutdown().await;
}

#[tokio::test]
async fn pipeline_failure_is_reported_through_status() {
    let app = TestApp::spawn().await;
    let mut audio = CORRUPT.to_vec();
    audio.extend_from_slice(AUDIO);

    let task_id = app.submit_ok(&audio, None).await;
    let json = app.wait_for_terminal(&task_id).await;

    assert_eq!(json["status"], "FAILED");
    assert!(json["download_url"].is_null());
    let error = json["result"]["error"].as_str().unwrap();
    assert!(error.contains("standardization"), "{}", error);
    app.shutdown().await;
}

#[tokio::test]
async fn pass_through_when_restoration_is_disabled() {
    let app = TestApp::spawn_with(|s| s.punctuation.enabled = false).await;
    let task_id = app.submit_ok(AUDIO, Some("pdf")).await;

    let json = app.wait_for_terminal(&task_id).await;
    assert_eq!(json["status"], "SUCCESS");
    assert_eq!(json["result"]["text"], "hello world how are you");
    assert_eq!(json["result"]["restored"], false);
}
