use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct Settings {
    #[validate(nested)]
    pub app: AppSettings,
    #[validate(nested)]
    pub database: DatabaseSettings,
    #[validate(nested)]
    pub audio: AudioSettings,
    #[validate(nested)]
    pub punctuation: PunctuationSettings,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
    /// Base URL used when building download links. Falls back to the request's Host header.
    pub public_url: Option<String>,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseBackend {
    Mongodb,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct DatabaseSettings {
    pub backend: DatabaseBackend,
    pub url: String,
    pub name: String,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ModelInfo {
    pub code: String,
    pub description: String,
    pub language: String,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct AudioSettings {
    pub temp_dir: String,
    pub output_dir: String,
    pub model_dir: String,
    pub models: Vec<ModelInfo>,
    #[validate(range(min = 1))]
    pub sample_rate: u32,
    #[validate(range(min = 1))]
    pub channels: u16,
    /// Bytes of standardized PCM handed to the recognizer per call.
    #[validate(range(min = 1))]
    pub chunk_buffer_size: usize,
    pub ffmpeg_path: String,
    pub default_output_format: String,
    /// Capped at ten years.
    #[validate(range(min = 1, max = 87_600))]
    pub output_retention_hours: u64,
    #[validate(range(min = 1, max = 87_600))]
    pub stale_task_hours: u64,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct PunctuationSettings {
    pub enabled: bool,
    #[validate(range(min = 1))]
    pub pool_size: usize,
    pub working_dir: String,
    #[validate(length(min = 1))]
    pub launch_command: Vec<String>,
    /// Commands run once, in order, before the first worker starts.
    pub bootstrap_commands: Vec<Vec<String>>,
    /// Budget for a single worker to answer one request.
    #[validate(range(min = 1))]
    pub max_processing_secs: u64,
    /// Overall wait for a restoration, including time spent queued.
    #[validate(range(min = 1))]
    pub ceiling_wait_secs: u64,
    #[validate(range(min = 1))]
    pub startup_timeout_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("SCRIBE")
                    .list_separator(",")
                    .with_list_parse_key("app.cors_origins")
                    .with_list_parse_key("punctuation.launch_command")
                    .try_parsing(true),
            )
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 3000)?
            .set_default("app.public_url", None::<String>)?
            .set_default("app.cors_origins", Vec::<String>::new())?
            .set_default("database.backend", "mongodb")?
            .set_default("database.url", "mongodb://localhost:27017")?
            .set_default("database.name", "scribe")?
            .set_default("audio.temp_dir", "./temp/audio")?
            .set_default("audio.output_dir", "./output")?
            .set_default("audio.model_dir", "./model")?
            .set_default("audio.models", Vec::<String>::new())?
            .set_default("audio.sample_rate", 16000)?
            .set_default("audio.channels", 1)?
            .set_default("audio.chunk_buffer_size", 2048)?
            .set_default("audio.ffmpeg_path", "ffmpeg")?
            .set_default("audio.default_output_format", "txt")?
            .set_default("audio.output_retention_hours", 24)?
            .set_default("audio.stale_task_hours", 1)?
            .set_default("punctuation.enabled", true)?
            .set_default("punctuation.pool_size", 2)?
            .set_default("punctuation.working_dir", "./python")?
            .set_default(
                "punctuation.launch_command",
                vec!["python3".to_string(), "punctuation_restoration.py".to_string()],
            )?
            .set_default("punctuation.bootstrap_commands", Vec::<String>::new())?
            .set_default("punctuation.max_processing_secs", 60)?
            .set_default("punctuation.ceiling_wait_secs", 300)?
            .set_default("punctuation.startup_timeout_secs", 120)?
            .build()?;

        let settings: Self = config.try_deserialize()?;
        settings
            .validate()
            .map_err(|e| ConfigError::Message(format!("invalid settings: {}", e)))?;
        Ok(settings)
    }

    pub fn retention(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.audio.output_retention_hours.saturating_mul(3600))
    }

    /// Age after which an unowned `PROCESSING` record is considered abandoned.
    pub fn stale_after(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.audio.stale_task_hours.saturating_mul(3600))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::load().expect("Failed to load default settings")
    }
}
