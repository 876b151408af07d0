use scribe_config::Settings;
use scribe_services::{TaskRegistry, TranscriptionService};
use std::sync::Arc;

use crate::ws::storage::WsStorage;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub registry: Arc<TaskRegistry>,
    pub transcription: Arc<TranscriptionService>,
    pub ws_storage: Arc<WsStorage>,
}

impl AppState {
    pub fn new(settings: Settings, transcription: Arc<TranscriptionService>) -> Self {
        Self {
            settings,
            registry: Arc::clone(transcription.registry()),
            transcription,
            ws_storage: Arc::new(WsStorage::new()),
        }
    }
}
