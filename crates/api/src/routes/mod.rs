pub mod catalog;
pub mod files;
pub mod task;
pub mod transcription;
