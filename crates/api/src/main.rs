use scribe_api::{build_router, start_notifications, state::AppState};
use scribe_config::{DatabaseBackend, Settings};
use scribe_db::{connect, indexes::ensure_indexes};
use scribe_services::background::{PipelineSettings, RestorationMode};
use scribe_services::dao::{MemoryTaskRepository, MongoTaskRepository, TaskRepository};
use scribe_services::{RetentionSweeper, TaskRegistry, TranscriptionService};
use scribe_transcription::{FfmpegStandardizer, RecognizerFactory};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (silently ignore if missing)
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "scribe_api=debug,scribe_services=debug,scribe_db=debug,scribe_transcription=debug,tower_http=debug"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load()?;
    info!("Starting Scribe API on {}:{}", settings.app.host, settings.app.port);

    let repo: Arc<dyn TaskRepository> = match settings.database.backend {
        DatabaseBackend::Mongodb => {
            let db = connect(&settings).await?;
            ensure_indexes(&db).await?;
            Arc::new(MongoTaskRepository::new(&db))
        }
        DatabaseBackend::Memory => {
            warn!("Using in-memory task storage, records are lost on restart");
            Arc::new(MemoryTaskRepository::new())
        }
    };
    let registry = Arc::new(TaskRegistry::new(repo));

    let restoration = RestorationMode::start(&settings.punctuation).await;
    let standardizer = Arc::new(FfmpegStandardizer::new(
        &settings.audio.ffmpeg_path,
        settings.audio.sample_rate,
        settings.audio.channels,
    ));
    let transcription = Arc::new(TranscriptionService::new(
        registry.clone(),
        recognizer_factory(&settings),
        standardizer,
        restoration,
        PipelineSettings::from(&settings.audio),
    ));
    info!(models = transcription.available_models().len(), "Transcription service ready");

    let sweeper = Arc::new(RetentionSweeper::new(
        registry,
        &settings.audio.output_dir,
        settings.retention(),
        settings.stale_after(),
    ));
    let mut scheduler = sweeper.schedule().await?;

    let app_state = AppState::new(settings.clone(), transcription.clone());
    let forwarder = start_notifications(&app_state);
    let app = build_router(app_state);

    let addr = format!("{}:{}", settings.app.host, settings.app.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    forwarder.abort();
    transcription.shutdown().await;
    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Scheduler shutdown failed");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(feature = "local-whisper")]
fn recognizer_factory(settings: &Settings) -> Arc<dyn RecognizerFactory> {
    use scribe_transcription::asr::local_whisper::WhisperRecognizerFactory;

    let languages = settings
        .audio
        .models
        .iter()
        .map(|m| (m.code.clone(), m.language.clone()))
        .collect();
    Arc::new(WhisperRecognizerFactory::new(&settings.audio.model_dir, languages))
}

#[cfg(not(feature = "local-whisper"))]
fn recognizer_factory(_settings: &Settings) -> Arc<dyn RecognizerFactory> {
    warn!("Built without a speech recognition backend, no models are available");
    Arc::new(NoRecognizers)
}

#[cfg(not(feature = "local-whisper"))]
struct NoRecognizers;

#[cfg(not(feature = "local-whisper"))]
impl RecognizerFactory for NoRecognizers {
    fn supports(&self, _model: &str) -> bool {
        false
    }

    fn create(
        &self,
        model: &str,
        _sample_rate: u32,
    ) -> anyhow::Result<Box<dyn scribe_transcription::Recognizer>> {
        anyhow::bail!("no recognition backend for model '{}'", model)
    }

    fn name(&self) -> &str {
        "none"
    }
}
