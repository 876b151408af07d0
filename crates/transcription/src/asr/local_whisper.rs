use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{RecognitionResult, Recognizer, RecognizerFactory, WordTiming};
use crate::pipeline::PcmBuffer;

/// Seconds of audio decoded per Whisper pass.
const WINDOW_SECS: usize = 30;

/// Loads GGML Whisper models from `model_dir/<code>.bin` on first use.
pub struct WhisperRecognizerFactory {
    model_dir: PathBuf,
    /// Model code -> language hint. Codes mapped to "multi" or "auto" auto-detect.
    languages: HashMap<String, String>,
    contexts: DashMap<String, Arc<WhisperContext>>,
}

impl WhisperRecognizerFactory {
    pub fn new(model_dir: impl Into<PathBuf>, languages: HashMap<String, String>) -> Self {
        Self {
            model_dir: model_dir.into(),
            languages,
            contexts: DashMap::new(),
        }
    }

    fn model_path(&self, model: &str) -> PathBuf {
        self.model_dir.join(format!("{}.bin", model))
    }

    fn context(&self, model: &str) -> anyhow::Result<Arc<WhisperContext>> {
        if let Some(ctx) = self.contexts.get(model) {
            return Ok(ctx.clone());
        }

        let path = self.model_path(model);
        let path_str = path.to_string_lossy().into_owned();
        info!(model_path = %path_str, "Loading Whisper model");
        let ctx = WhisperContext::new_with_params(&path_str, WhisperContextParameters::default())
            .map_err(|e| anyhow::anyhow!("Failed to load Whisper model '{}': {}", path_str, e))?;
        let ctx = Arc::new(ctx);
        self.contexts.insert(model.to_string(), ctx.clone());
        info!(model, "Whisper model loaded");
        Ok(ctx)
    }
}

impl RecognizerFactory for WhisperRecognizerFactory {
    fn supports(&self, model: &str) -> bool {
        self.contexts.contains_key(model) || self.model_path(model).is_file()
    }

    fn create(&self, model: &str, sample_rate: u32) -> anyhow::Result<Box<dyn Recognizer>> {
        let ctx = self.context(model)?;
        let language = self
            .languages
            .get(model)
            .filter(|l| !matches!(l.as_str(), "multi" | "auto" | ""))
            .cloned();
        Ok(Box::new(WhisperRecognizer {
            ctx,
            language,
            sample_rate: sample_rate as usize,
            buffer: PcmBuffer::new(),
        }))
    }

    fn name(&self) -> &str {
        "local_whisper"
    }
}

/// Buffers PCM and decodes it in fixed windows.
pub struct WhisperRecognizer {
    ctx: Arc<WhisperContext>,
    language: Option<String>,
    sample_rate: usize,
    buffer: PcmBuffer,
}

impl WhisperRecognizer {
    fn window_samples(&self) -> usize {
        self.sample_rate * WINDOW_SECS
    }

    fn decode_window(&mut self) -> anyhow::Result<RecognitionResult> {
        let (offset, audio) = self.buffer.drain_window(self.window_samples());
        if audio.is_empty() {
            return Ok(RecognitionResult::default());
        }
        let offset_secs = offset as f64 / self.sample_rate as f64;

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| anyhow::anyhow!("Failed to create Whisper state: {}", e))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        if let Some(ref lang) = self.language {
            params.set_language(Some(lang));
        }
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio)
            .map_err(|e| anyhow::anyhow!("Whisper transcription failed: {}", e))?;

        let mut text = String::new();
        let mut words = Vec::new();
        for i in 0..state.full_n_segments() {
            let Some(segment) = state.get_segment(i) else {
                continue;
            };
            let Ok(seg_text) = segment.to_str() else {
                continue;
            };
            let seg_text = seg_text.trim();
            if seg_text.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(seg_text);
            // whisper timestamps are in centiseconds
            words.push(WordTiming {
                word: seg_text.to_string(),
                start: offset_secs + segment.start_timestamp() as f64 / 100.0,
                end: offset_secs + segment.end_timestamp() as f64 / 100.0,
            });
        }

        debug!(offset_secs, text_len = text.len(), "Whisper window decoded");
        Ok(RecognitionResult::new(text, words))
    }
}

impl Recognizer for WhisperRecognizer {
    fn accept_chunk(&mut self, chunk: &[u8]) -> anyhow::Result<Option<RecognitionResult>> {
        self.buffer.push_bytes(chunk);
        if self.buffer.len() < self.window_samples() {
            return Ok(None);
        }
        self.decode_window().map(Some)
    }

    fn final_result(&mut self) -> anyhow::Result<RecognitionResult> {
        let mut text = Vec::new();
        let mut words = Vec::new();
        while !self.buffer.is_empty() {
            let result = self.decode_window()?;
            if !result.text.is_empty() {
                text.push(result.text);
            }
            words.extend(result.words);
        }
        Ok(RecognitionResult::new(text.join(" "), words))
    }
}
