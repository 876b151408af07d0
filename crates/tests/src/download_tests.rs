use crate::fixtures::test_app::TestApp;
use serde_json::Value;

const AUDIO: &[u8] = b"good morning everyone\n";

#[tokio::test]
async fn rendered_output_can_be_downloaded() {
    let app = TestApp::spawn().await;
    let task_id = app.submit_ok(AUDIO, Some("txt")).await;
    let json = app.wait_for_terminal(&task_id).await;

    let resp = app
        .client
        .get(json["download_url"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let body = resp.text().await.unwrap();
    assert!(body.starts_with("Transcription Result"));
    assert!(body.contains("good morning everyone."));
    assert!(body.contains("(0.00 ~ 1.50) good morning everyone"));
    app.shutdown().await;
}

#[tokio::test]
async fn docx_and_pdf_outputs_have_expected_containers() {
    let app = TestApp::spawn().await;
    for (format, magic) in [("docx", &b"PK"[..]), ("pdf", &b"%PDF"[..])] {
        let task_id = app.submit_ok(AUDIO, Some(format)).await;
        let json = app.wait_for_terminal(&task_id).await;
        let bytes = app
            .client
            .get(json["download_url"].as_str().unwrap())
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert!(bytes.starts_with(magic), "{} output", format);
    }
    app.shutdown().await;
}

#[tokio::test]
async fn swept_output_reports_expiry() {
    let app = TestApp::spawn().await;
    let task_id = app.submit_ok(AUDIO, None).await;
    app.wait_for_terminal(&task_id).await;

    let file_name = format!("{}_output.txt", task_id);
    std::fs::remove_file(app.output_dir().join(&file_name)).unwrap();

    let resp = app
        .client
        .get(app.url(&format!("/files/{}", file_name)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let json: Value = resp.json().await.unwrap();
    assert!(json["message"].as_str().unwrap().contains("expired at"));
    app.shutdown().await;
}

#[tokio::test]
async fn missing_output_for_unknown_task() {
    let app = TestApp::spawn().await;

    let resp = app
        .client
        .get(app.url("/files/nothing_output.pdf"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["message"], "No output for task nothing");

    let resp = app
        .client
        .get(app.url("/files/settings.toml"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    app.shutdown().await;
}
