#[cfg(feature = "local-whisper")]
pub mod local_whisper;

use serde::{Deserialize, Serialize};

/// Timing of one recognized word, in seconds from the start of the audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// One incremental result from a recognizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub text: String,
    #[serde(default)]
    pub words: Vec<WordTiming>,
}

impl RecognitionResult {
    pub fn new(text: impl Into<String>, words: Vec<WordTiming>) -> Self {
        Self {
            text: text.into(),
            words,
        }
    }
}

/// A streaming speech recognizer fed with standardized PCM bytes.
///
/// Implementations are CPU-bound and are driven from a blocking thread.
pub trait Recognizer: Send {
    /// Feeds one chunk. Returns a result when the recognizer has finalized an utterance.
    fn accept_chunk(&mut self, chunk: &[u8]) -> anyhow::Result<Option<RecognitionResult>>;

    /// Flushes whatever is still buffered.
    fn final_result(&mut self) -> anyhow::Result<RecognitionResult>;
}

/// Provides recognizers for the configured model codes.
pub trait RecognizerFactory: Send + Sync + 'static {
    /// Whether `model` can be loaded.
    fn supports(&self, model: &str) -> bool;

    fn create(&self, model: &str, sample_rate: u32) -> anyhow::Result<Box<dyn Recognizer>>;

    /// Human-readable backend name.
    fn name(&self) -> &str;
}
