use crate::fixtures::fakes::MODEL;
use crate::fixtures::test_app::TestApp;
use serde_json::Value;

#[tokio::test]
async fn lists_only_loadable_models() {
    let app = TestApp::spawn().await;

    let resp = app.client.get(app.url("/api/model")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let json: Value = resp.json().await.unwrap();
    let models = json.as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["code"], MODEL);
    assert_eq!(models[0]["language"], "en");
    app.shutdown().await;
}

#[tokio::test]
async fn lists_output_formats() {
    let app = TestApp::spawn().await;

    let json: Value = app
        .client
        .get(app.url("/api/output-format"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json, serde_json::json!(["txt", "docx", "pdf"]));
    app.shutdown().await;
}

#[tokio::test]
async fn health_reports_pool_state() {
    let app = TestApp::spawn().await;

    let json: Value = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["restoration"]["mode"], "pool");
    assert_eq!(json["restoration"]["workers"], 2);
    assert_eq!(json["restoration"]["live_workers"], 2);
    app.shutdown().await;
}

#[tokio::test]
async fn health_reports_pass_through_when_worker_cannot_start() {
    let app = TestApp::spawn_with(|s| {
        s.punctuation.launch_command = vec!["/nonexistent/restorer".to_string()];
    })
    .await;

    let json: Value = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["restoration"]["mode"], "pass_through");
    assert!(json["restoration"]["reason"].as_str().unwrap().contains("start"));
}
