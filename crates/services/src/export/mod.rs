pub mod docx;
pub mod pdf;
pub mod txt;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use scribe_transcription::Segment;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// File formats a transcription can be rendered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Txt,
    Docx,
    Pdf,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Txt, OutputFormat::Docx, OutputFormat::Pdf];

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Txt => "txt",
            OutputFormat::Docx => "docx",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Txt => "text/plain; charset=utf-8",
            OutputFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            OutputFormat::Pdf => "application/pdf",
        }
    }

    /// Format of a rendered file, judged by its extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        ext.parse().ok()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    /// Case-insensitive; tolerates surrounding whitespace and quotes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        match cleaned.to_ascii_lowercase().as_str() {
            "txt" => Ok(OutputFormat::Txt),
            "docx" => Ok(OutputFormat::Docx),
            "pdf" => Ok(OutputFormat::Pdf),
            _ => Err(format!("unsupported output format '{}'", s)),
        }
    }
}

/// Structured outcome of a transcription, also stored as the task result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionDocument {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<Segment>>,
    /// False when punctuation restoration was skipped.
    pub restored: bool,
}

/// One line of the shared document layout.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Block {
    Title(String),
    Heading(String),
    Body(String),
    Blank,
}

pub(crate) const TITLE: &str = "Transcription Result";
pub(crate) const TIMELINE: &str = "Segments Timeline";
pub(crate) const TIMELINE_LEGEND: &str = "(Start time ~ End time)";

pub(crate) fn layout(doc: &TranscriptionDocument) -> Vec<Block> {
    let mut blocks = vec![
        Block::Title(TITLE.to_string()),
        Block::Blank,
        Block::Body(doc.text.clone()),
    ];

    if let Some(segments) = doc.segments.as_deref().filter(|s| !s.is_empty()) {
        blocks.push(Block::Blank);
        blocks.push(Block::Heading(TIMELINE.to_string()));
        blocks.push(Block::Body(TIMELINE_LEGEND.to_string()));
        for segment in segments {
            blocks.push(Block::Body(format!(
                "({:.2} ~ {:.2}) {}",
                segment.start_time, segment.end_time, segment.text
            )));
        }
    }
    blocks
}

pub fn output_file_name(task_id: &str, format: OutputFormat) -> String {
    format!("{}_output.{}", task_id, format.extension())
}

/// Task id encoded in a rendered file name.
pub fn task_id_from_file_name(name: &str) -> Option<&str> {
    let (stem, _) = name.rsplit_once('.')?;
    stem.strip_suffix("_output").filter(|id| !id.is_empty())
}

/// Renders `doc` into `output_dir` and returns the written path.
pub async fn render(
    format: OutputFormat,
    doc: &TranscriptionDocument,
    output_dir: &Path,
    task_id: &str,
) -> anyhow::Result<PathBuf> {
    let bytes = match format {
        OutputFormat::Txt => txt::render(doc).into_bytes(),
        OutputFormat::Docx => docx::render(doc)?,
        OutputFormat::Pdf => pdf::render(doc)?,
    };

    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("create output dir {}", output_dir.display()))?;
    let path = output_dir.join(output_file_name(task_id, format));
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("write {}", path.display()))?;

    debug!(task_id, path = %path.display(), bytes = bytes.len(), "Output rendered");
    Ok(path)
}
