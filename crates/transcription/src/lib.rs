pub mod asr;
pub mod pipeline;
pub mod standardize;

pub use asr::{RecognitionResult, Recognizer, RecognizerFactory, WordTiming};
pub use pipeline::{Segment, SegmentCollector, recognize_pcm_file};
pub use standardize::{AudioStandardizer, FfmpegStandardizer};
