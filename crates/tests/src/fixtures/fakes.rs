//! Stand-ins for ffmpeg, the speech recognizer and the restoration worker.

use async_trait::async_trait;
use scribe_transcription::{
    AudioStandardizer, RecognitionResult, Recognizer, RecognizerFactory, WordTiming,
};
use std::path::Path;

pub const MODEL: &str = "fake-en";
/// Configured but never loadable.
pub const MISSING_MODEL: &str = "fake-missing";
/// Uploads starting with this marker fail standardization.
pub const CORRUPT: &[u8] = b"CORRUPT";

/// Copies the upload through unchanged, so test "audio" is plain text.
pub struct CopyStandardizer;

#[async_trait]
impl AudioStandardizer for CopyStandardizer {
    async fn standardize(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        let data = tokio::fs::read(input).await?;
        if data.starts_with(CORRUPT) {
            anyhow::bail!("invalid data found when processing input");
        }
        tokio::fs::write(output, data).await?;
        Ok(())
    }
}

/// Treats the input bytes as text and yields one result per line, with each
/// word lasting half a second.
pub struct LineRecognizer {
    pending: Vec<u8>,
    clock: f64,
}

impl LineRecognizer {
    fn take_line(&mut self, line: &[u8]) -> RecognitionResult {
        let text = String::from_utf8_lossy(line).trim().to_string();
        let words = text
            .split_whitespace()
            .map(|word| {
                let start = self.clock;
                self.clock += 0.5;
                WordTiming {
                    word: word.to_string(),
                    start,
                    end: self.clock,
                }
            })
            .collect();
        RecognitionResult::new(text, words)
    }
}

impl Recognizer for LineRecognizer {
    fn accept_chunk(&mut self, chunk: &[u8]) -> anyhow::Result<Option<RecognitionResult>> {
        self.pending.extend_from_slice(chunk);
        let Some(pos) = self.pending.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };
        let line: Vec<u8> = self.pending.drain(..=pos).collect();
        Ok(Some(self.take_line(&line)))
    }

    fn final_result(&mut self) -> anyhow::Result<RecognitionResult> {
        let rest = std::mem::take(&mut self.pending);
        let mut text = Vec::new();
        let mut words = Vec::new();
        for line in rest.split(|b| *b == b'\n') {
            let result = self.take_line(line);
            if !result.text.is_empty() {
                text.push(result.text);
                words.extend(result.words);
            }
        }
        Ok(RecognitionResult::new(text.join(" "), words))
    }
}

pub struct LineRecognizerFactory;

impl RecognizerFactory for LineRecognizerFactory {
    fn supports(&self, model: &str) -> bool {
        model == MODEL
    }

    fn create(&self, model: &str, _sample_rate: u32) -> anyhow::Result<Box<dyn Recognizer>> {
        if !self.supports(model) {
            anyhow::bail!("model '{}' is not installed", model);
        }
        Ok(Box::new(LineRecognizer {
            pending: Vec::new(),
            clock: 0.0,
        }))
    }

    fn name(&self) -> &str {
        "line"
    }
}

/// Restoration worker that answers after a short pause and ends the text
/// with a period.
pub const PUNCTUATING_WORKER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"taskId":"\([^"]*\)".*/\1/p')
  text=$(printf '%s' "$line" | sed -n 's/.*"text":"\([^"]*\)".*/\1/p')
  echo "restorer: handling $id"
  sleep 0.2
  printf '{"taskId":"%s","isSuccess":true,"restoredText":"%s."}\n' "$id" "$text"
done
"#;
