use serde::{Deserialize, Serialize};

use crate::asr::RecognitionResult;

/// A timed span of recognized speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
}

/// Turns recognizer results into segments.
///
/// Results with empty text are dropped. A non-empty result yields exactly one
/// segment spanning its first to last word. When the recognizer reports no
/// word timing the segment is pinned, zero-length, at the previous segment's end.
#[derive(Debug, Default)]
pub struct SegmentCollector {
    segments: Vec<Segment>,
    last_end: f64,
}

impl SegmentCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the result produced a segment.
    pub fn push(&mut self, result: &RecognitionResult) -> bool {
        let text = result.text.trim();
        if text.is_empty() {
            return false;
        }

        let (start_time, end_time) = match (result.words.first(), result.words.last()) {
            (Some(first), Some(last)) => (first.start, last.end),
            _ => (self.last_end, self.last_end),
        };

        self.last_end = end_time;
        self.segments.push(Segment {
            text: text.to_string(),
            start_time,
            end_time,
        });
        true
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segment texts joined with single spaces.
    pub fn joined_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }
}
