use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::asr::Recognizer;

use super::segment::SegmentCollector;

/// Streams a standardized PCM file through `recognizer` in `chunk_size` reads.
///
/// `on_progress` receives the percentage of bytes consumed, in `[0, 100]`. It is
/// called whenever the recognizer yields a result and whenever the whole
/// percentage advances, not once per chunk.
pub fn recognize_pcm_file(
    recognizer: &mut dyn Recognizer,
    path: &Path,
    chunk_size: usize,
    mut on_progress: impl FnMut(f64),
) -> anyhow::Result<SegmentCollector> {
    let mut file =
        File::open(path).with_context(|| format!("open standardized audio {}", path.display()))?;
    let total = file.metadata()?.len();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut processed: u64 = 0;
    let mut last_whole: u64 = 0;
    let mut collector = SegmentCollector::new();

    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("read standardized audio {}", path.display()))?;
        if n == 0 {
            break;
        }
        processed += n as u64;

        let produced = match recognizer.accept_chunk(&buf[..n])? {
            Some(result) => collector.push(&result),
            None => false,
        };

        let percent = percent_of(processed, total);
        let whole = percent as u64;
        if produced || whole > last_whole {
            last_whole = whole;
            on_progress(percent);
        }
    }

    let last = recognizer.final_result()?;
    collector.push(&last);
    debug!(
        bytes = processed,
        segments = collector.segments().len(),
        "Recognition finished"
    );

    Ok(collector)
}

fn percent_of(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (processed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}
