use scribe_api::{build_router, start_notifications, state::AppState};
use scribe_config::{
    AppSettings, AudioSettings, DatabaseBackend, DatabaseSettings, ModelInfo,
    PunctuationSettings, Settings,
};
use scribe_services::background::{PipelineSettings, RestorationMode};
use scribe_services::dao::MemoryTaskRepository;
use scribe_services::{TaskRegistry, TranscriptionService};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

use super::fakes::{
    CopyStandardizer, LineRecognizerFactory, MISSING_MODEL, MODEL, PUNCTUATING_WORKER,
};

/// A running server with in-memory storage and fake collaborators.
pub struct TestApp {
    pub addr: SocketAddr,
    pub base_url: String,
    pub settings: Settings,
    pub repo: Arc<MemoryTaskRepository>,
    pub client: reqwest::Client,
    transcription: Arc<TranscriptionService>,
    _dir: TempDir,
}

impl TestApp {
    /// Spawns a server backed by a two-worker restoration pool.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawns a server after `mutator` has adjusted the default test settings.
    pub async fn spawn_with<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Settings),
    {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let script = dir.path().join("worker.sh");
        std::fs::write(&script, PUNCTUATING_WORKER).expect("Failed to write worker script");

        let mut settings = test_settings(dir.path().to_path_buf(), &script.to_string_lossy());
        mutator(&mut settings);

        let repo = Arc::new(MemoryTaskRepository::new());
        let registry = Arc::new(TaskRegistry::new(repo.clone()));
        let restoration = RestorationMode::start(&settings.punctuation).await;
        let transcription = Arc::new(TranscriptionService::new(
            registry,
            Arc::new(LineRecognizerFactory),
            Arc::new(CopyStandardizer),
            restoration,
            PipelineSettings::from(&settings.audio),
        ));

        let app_state = AppState::new(settings.clone(), transcription.clone());
        start_notifications(&app_state);
        let app = build_router(app_state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            base_url: format!("http://{}", addr),
            settings,
            repo,
            client: reqwest::Client::new(),
            transcription,
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.settings.audio.output_dir)
    }

    /// Posts a multipart submission. `None` fields are left out of the form.
    pub async fn submit(
        &self,
        audio: Option<&[u8]>,
        model: Option<&str>,
        format: Option<&str>,
    ) -> reqwest::Response {
        let mut form = reqwest::multipart::Form::new();
        if let Some(audio) = audio {
            form = form.part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec()).file_name("meeting.wav"),
            );
        }
        if let Some(model) = model {
            form = form.text("model", model.to_string());
        }
        if let Some(format) = format {
            form = form.text("format", format.to_string());
        }
        self.client
            .post(self.url("/api/transcription"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    /// Submits and returns the task id, asserting the request was accepted.
    pub async fn submit_ok(&self, audio: &[u8], format: Option<&str>) -> String {
        let resp = self.submit(Some(audio), Some(MODEL), format).await;
        assert_eq!(resp.status().as_u16(), 200);
        let json: Value = resp.json().await.unwrap();
        json["task_id"].as_str().unwrap().to_string()
    }

    pub async fn task_status(&self, task_id: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/api/task/{}", task_id)))
            .send()
            .await
            .unwrap()
    }

    /// Polls the status endpoint until the task is terminal.
    pub async fn wait_for_terminal(&self, task_id: &str) -> Value {
        for _ in 0..200 {
            let json: Value = self.task_status(task_id).await.json().await.unwrap();
            if json["status"] != "PROCESSING" {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("task {} did not finish in time", task_id);
    }

    pub async fn shutdown(&self) {
        self.transcription.shutdown().await;
    }
}

fn test_settings(root: PathBuf, worker_script: &str) -> Settings {
    let path = |name: &str| root.join(name).to_string_lossy().into_owned();
    Settings {
        app: AppSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            public_url: None,
            cors_origins: vec![],
        },
        database: DatabaseSettings {
            backend: DatabaseBackend::Memory,
            url: String::new(),
            name: "scribe_test".to_string(),
            max_pool_size: None,
            min_pool_size: None,
        },
        audio: AudioSettings {
            temp_dir: path("temp"),
            output_dir: path("output"),
            model_dir: path("model"),
            models: vec![
                ModelInfo {
                    code: MODEL.to_string(),
                    description: "Line-per-utterance test model".to_string(),
                    language: "en".to_string(),
                },
                ModelInfo {
                    code: MISSING_MODEL.to_string(),
                    description: "Configured but not installed".to_string(),
                    language: "de".to_string(),
                },
            ],
            sample_rate: 16_000,
            channels: 1,
            chunk_buffer_size: 8,
            ffmpeg_path: "ffmpeg".to_string(),
            default_output_format: "txt".to_string(),
            output_retention_hours: 24,
            stale_task_hours: 1,
        },
        punctuation: PunctuationSettings {
            enabled: true,
            pool_size: 2,
            working_dir: root.to_string_lossy().into_owned(),
            launch_command: vec!["/bin/sh".to_string(), worker_script.to_string()],
            bootstrap_commands: vec![],
            max_processing_secs: 5,
            ceiling_wait_secs: 10,
            startup_timeout_secs: 5,
        },
    }
}
