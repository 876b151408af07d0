use std::path::{Path, PathBuf};
use std::sync::Arc;

use scribe_config::{AudioSettings, ModelInfo, PunctuationSettings};
use scribe_transcription::{
    AudioStandardizer, RecognizerFactory, SegmentCollector, recognize_pcm_file,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::export::{self, OutputFormat, TranscriptionDocument};
use crate::restoration::{RestorationError, RestorationPool, WorkerConfig};

use super::task_store::{RegistryError, TaskRegistry};

/// Share of overall progress covered by speech recognition.
const RECOGNITION_SHARE: f64 = 90.0;
const RESTORED_PROGRESS: f64 = 95.0;
const RENDERED_PROGRESS: f64 = 99.0;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("uploaded file is empty")]
    EmptyFile,
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    #[error("{0}")]
    UnknownFormat(String),
    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("audio standardization failed: {0:#}")]
    Standardize(anyhow::Error),
    #[error("speech recognition failed: {0:#}")]
    Recognize(anyhow::Error),
    #[error("punctuation restoration failed: {0}")]
    Restore(#[from] RestorationError),
    #[error("rendering output failed: {0:#}")]
    Render(anyhow::Error),
    #[error("encoding result failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transcription aborted: {0}")]
    Aborted(String),
}

/// Where restored text comes from.
pub enum RestorationMode {
    Pool(RestorationPool),
    /// Restoration is unavailable; recognized text is kept as is.
    PassThrough(String),
}

impl RestorationMode {
    /// Starts the worker pool, degrading to pass-through when it cannot run.
    pub async fn start(settings: &PunctuationSettings) -> Self {
        if !settings.enabled {
            info!("Punctuation restoration disabled");
            return RestorationMode::PassThrough("disabled by configuration".to_string());
        }
        match RestorationPool::configure(&WorkerConfig::from(settings)).await {
            Ok(pool) => {
                info!(workers = pool.size(), "Punctuation restoration pool ready");
                RestorationMode::Pool(pool)
            }
            Err(e) => {
                error!(
                    error = %e,
                    "Punctuation restoration unavailable, transcripts will not be restored"
                );
                RestorationMode::PassThrough(e.to_string())
            }
        }
    }

    pub fn pool(&self) -> Option<&RestorationPool> {
        match self {
            RestorationMode::Pool(pool) => Some(pool),
            RestorationMode::PassThrough(_) => None,
        }
    }
}

/// Filesystem and audio parameters of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub sample_rate: u32,
    pub chunk_buffer_size: usize,
    pub models: Vec<ModelInfo>,
    pub default_format: OutputFormat,
}

impl From<&AudioSettings> for PipelineSettings {
    fn from(audio: &AudioSettings) -> Self {
        let default_format = audio.default_output_format.parse().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid default output format, using txt");
            OutputFormat::Txt
        });
        Self {
            temp_dir: PathBuf::from(&audio.temp_dir),
            output_dir: PathBuf::from(&audio.output_dir),
            sample_rate: audio.sample_rate,
            chunk_buffer_size: audio.chunk_buffer_size,
            models: audio.models.clone(),
            default_format,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub file_name: String,
    pub data: Vec<u8>,
    pub model: String,
    /// Falls back to the configured default when absent.
    pub format: Option<String>,
    pub include_segments: bool,
    /// Prefix for the download URL, e.g. `http://host:port`.
    pub base_url: String,
}

#[derive(Debug, Clone)]
struct Job {
    task_id: String,
    model: String,
    format: OutputFormat,
    include_segments: bool,
    upload: PathBuf,
    base_url: String,
}

struct Finished {
    result: String,
    download_url: String,
}

/// Accepts uploads and drives each through standardization, recognition,
/// restoration and rendering in the background.
pub struct TranscriptionService {
    registry: Arc<TaskRegistry>,
    recognizers: Arc<dyn RecognizerFactory>,
    standardizer: Arc<dyn AudioStandardizer>,
    restoration: RestorationMode,
    settings: PipelineSettings,
}

impl TranscriptionService {
    pub fn new(
        registry: Arc<TaskRegistry>,
        recognizers: Arc<dyn RecognizerFactory>,
        standardizer: Arc<dyn AudioStandardizer>,
        restoration: RestorationMode,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            recognizers,
            standardizer,
            restoration,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn restoration(&self) -> &RestorationMode {
        &self.restoration
    }

    pub fn output_dir(&self) -> &Path {
        &self.settings.output_dir
    }

    /// Configured models the recognizer backend can actually load.
    pub fn available_models(&self) -> Vec<ModelInfo> {
        self.settings
            .models
            .iter()
            .filter(|m| self.recognizers.supports(&m.code))
            .cloned()
            .collect()
    }

    pub fn output_formats(&self) -> &'static [OutputFormat] {
        &OutputFormat::ALL
    }

    /// Validates and stores the upload, registers a task and starts the
    /// pipeline. Returns the new task id without waiting for the result.
    pub async fn submit(self: &Arc<Self>, request: SubmitRequest) -> Result<String, SubmitError> {
        if request.data.is_empty() {
            return Err(SubmitError::EmptyFile);
        }
        let model = request.model.trim().to_string();
        if !self.settings.models.iter().any(|m| m.code == model)
            || !self.recognizers.supports(&model)
        {
            return Err(SubmitError::UnknownModel(model));
        }
        let format = match request.format.as_deref().map(str::trim) {
            None | Some("") => self.settings.default_format,
            Some(raw) => raw.parse().map_err(SubmitError::UnknownFormat)?,
        };

        let task_id = uuid::Uuid::new_v4().simple().to_string();
        tokio::fs::create_dir_all(&self.settings.temp_dir).await?;
        let upload = self.settings.temp_dir.join(format!(
            "{}_{}",
            task_id,
            sanitize_file_name(&request.file_name)
        ));
        tokio::fs::write(&upload, &request.data).await?;

        if let Err(e) = self.registry.create(&task_id).await {
            let _ = tokio::fs::remove_file(&upload).await;
            return Err(e.into());
        }
        info!(
            task_id = %task_id,
            model = %model,
            format = %format,
            bytes = request.data.len(),
            "Transcription task accepted"
        );

        let job = Job {
            task_id: task_id.clone(),
            model,
            format,
            include_segments: request.include_segments,
            upload,
            base_url: request.base_url,
        };
        self.spawn_job(job);
        Ok(task_id)
    }

    fn spawn_job(self: &Arc<Self>, job: Job) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let task_id = job.task_id.clone();
            // Run in a child task so a panic still settles the task
            let runner = Arc::clone(&service);
            let outcome = match tokio::spawn(async move { runner.run_pipeline(&job).await }).await {
                Ok(outcome) => outcome,
                Err(e) => Err(PipelineError::Aborted(e.to_string())),
            };
            service.settle(&task_id, outcome).await;
            service.cleanup_temp(&task_id).await;
        });
    }

    async fn settle(&self, task_id: &str, outcome: Result<Finished, PipelineError>) {
        match outcome {
            Ok(done) => {
                if let Err(e) = self
                    .registry
                    .complete(task_id, done.result, done.download_url)
                    .await
                {
                    error!(task_id, error = %e, "Failed to record task success");
                }
            }
            Err(error) => {
                warn!(task_id, %error, "Transcription task failed");
                if let Err(e) = self.registry.fail(task_id, &error.to_string()).await {
                    error!(task_id, error = %e, "Failed to record task failure");
                }
            }
        }
    }

    async fn run_pipeline(&self, job: &Job) -> Result<Finished, PipelineError> {
        let pcm = self
            .settings
            .temp_dir
            .join(format!("{}_standardized.pcm", job.task_id));
        self.standardizer
            .standardize(&job.upload, &pcm)
            .await
            .map_err(PipelineError::Standardize)?;
        debug!(task_id = %job.task_id, "Audio standardized");

        let collector = self.recognize(job, pcm).await?;
        let text = collector.joined_text();
        info!(
            task_id = %job.task_id,
            segments = collector.segments().len(),
            "Recognition complete"
        );

        let (text, restored) = self.restore(job, text).await?;
        self.registry.update_progress(&job.task_id, RESTORED_PROGRESS);

        let document = TranscriptionDocument {
            text,
            segments: job.include_segments.then(|| collector.into_segments()),
            restored,
        };
        let path = export::render(job.format, &document, &self.settings.output_dir, &job.task_id)
            .await
            .map_err(PipelineError::Render)?;
        self.registry.update_progress(&job.task_id, RENDERED_PROGRESS);

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| export::output_file_name(&job.task_id, job.format));
        Ok(Finished {
            result: serde_json::to_string(&document)?,
            download_url: format!("{}/files/{}", job.base_url.trim_end_matches('/'), file_name),
        })
    }

    async fn recognize(&self, job: &Job, pcm: PathBuf) -> Result<SegmentCollector, PipelineError> {
        let recognizers = Arc::clone(&self.recognizers);
        let registry = Arc::clone(&self.registry);
        let task_id = job.task_id.clone();
        let model = job.model.clone();
        let sample_rate = self.settings.sample_rate;
        let chunk_size = self.settings.chunk_buffer_size;

        tokio::task::spawn_blocking(move || {
            let mut recognizer = recognizers.create(&model, sample_rate)?;
            recognize_pcm_file(recognizer.as_mut(), &pcm, chunk_size, |percent| {
                registry.update_progress(&task_id, percent * RECOGNITION_SHARE / 100.0);
            })
        })
        .await
        .map_err(|e| PipelineError::Aborted(e.to_string()))?
        .map_err(PipelineError::Recognize)
    }

    async fn restore(&self, job: &Job, text: String) -> Result<(String, bool), PipelineError> {
        match &self.restoration {
            RestorationMode::Pool(_) if text.is_empty() => Ok((text, true)),
            RestorationMode::Pool(pool) => {
                let restored = pool.submit(text, job.task_id.clone()).await?;
                Ok((restored, true))
            }
            RestorationMode::PassThrough(reason) => {
                warn!(task_id = %job.task_id, %reason, "Skipping punctuation restoration");
                Ok((text, false))
            }
        }
    }

    /// Best-effort removal of every temp file belonging to `task_id`.
    async fn cleanup_temp(&self, task_id: &str) {
        let mut entries = match tokio::fs::read_dir(&self.settings.temp_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(task_id, error = %e, "Cannot list temp dir for cleanup");
                return;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(task_id, error = %e, "Temp dir listing interrupted");
                    break;
                }
            };
            if !entry.file_name().to_string_lossy().starts_with(task_id) {
                continue;
            }
            let path = entry.path();
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(task_id, path = %path.display(), error = %e, "Failed to remove temp file");
            }
        }
    }

    /// Stops the restoration workers.
    pub async fn shutdown(&self) {
        if let Some(pool) = self.restoration.pool() {
            pool.shutdown().await;
        }
    }
}

/// Keeps only the final path component, limited to a safe character set.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
