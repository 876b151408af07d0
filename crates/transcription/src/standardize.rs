use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Converts an uploaded audio file into the raw PCM layout the recognizer expects.
#[async_trait]
pub trait AudioStandardizer: Send + Sync + 'static {
    async fn standardize(&self, input: &Path, output: &Path) -> anyhow::Result<()>;
}

/// Shells out to ffmpeg to produce headerless signed 16-bit little-endian PCM.
pub struct FfmpegStandardizer {
    ffmpeg_path: PathBuf,
    sample_rate: u32,
    channels: u16,
}

impl FfmpegStandardizer {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, sample_rate: u32, channels: u16) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            sample_rate,
            channels,
        }
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = Vec::new();
        args.push("-y".into());
        args.push("-nostdin".into());
        args.push("-i".into());
        args.push(input.into());
        args.push("-vn".into());
        args.push("-ac".into());
        args.push(self.channels.to_string().into());
        args.push("-ar".into());
        args.push(self.sample_rate.to_string().into());
        args.push("-f".into());
        args.push("s16le".into());
        args.push("-acodec".into());
        args.push("pcm_s16le".into());
        args.push(output.into());
        args
    }
}

#[async_trait]
impl AudioStandardizer for FfmpegStandardizer {
    async fn standardize(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        debug!(input = %input.display(), output = %output.display(), "Standardizing audio");

        let out = Command::new(&self.ffmpeg_path)
            .args(self.args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("spawn {}", self.ffmpeg_path.display()))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            bail!(
                "ffmpeg exited with {}: {}",
                out.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            );
        }
        Ok(())
    }
}
