//! Waveform peak sampling.
//!
//! The input is decoded to mono 8 kHz signed 16-bit PCM on stdout and the
//! samples are bucketed into peak amplitudes in `[0, 1]`.

use std::path::Path;
use std::time::Duration;

use reelforge_core::{Error, Result};

use crate::command::ToolCommand;
use crate::tools::{Tool, ToolRegistry};

/// Time allowed for decoding.
pub const WAVEFORM_TIMEOUT: Duration = Duration::from_secs(60);

const SAMPLE_RATE: &str = "8000";

/// Decode `path` and return `points` peak values.
pub async fn sample(tools: &ToolRegistry, path: &Path, points: usize) -> Result<Vec<f32>> {
    if points == 0 {
        return Err(Error::Validation("waveform needs at least one point".into()));
    }
    if !path.exists() {
        return Err(Error::not_found("file", path.display()));
    }
    let ffmpeg = tools.require(Tool::Transcoder)?;

    let output = ToolCommand::new(ffmpeg.to_path_buf())
        .args(["-v", "error", "-i"])
        .arg(path.to_string_lossy())
        .args(["-vn", "-ac", "1", "-ar", SAMPLE_RATE, "-f", "s16le", "-acodec", "pcm_s16le", "pipe:1"])
        .timeout(WAVEFORM_TIMEOUT)
        .execute()
        .await?;

    tracing::debug!(
        path = %path.display(),
        bytes = output.stdout.len(),
        points,
        "decoded waveform pcm"
    );
    Ok(peaks_from_pcm(&output.stdout, points))
}

/// Bucket little-endian s16 samples into `points` normalised peaks.
///
/// Fewer samples than points yields trailing zeros; a dangling odd byte is
/// ignored.
pub fn peaks_from_pcm(pcm: &[u8], points: usize) -> Vec<f32> {
    let mut peaks = vec![0.0f32; points];
    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    if samples.is_empty() || points == 0 {
        return peaks;
    }

    let len = samples.len();
    for (i, peak) in peaks.iter_mut().enumerate() {
        // Spread samples evenly; with fewer samples than points each one
        // gets its own bucket and the tail stays silent.
        let (start, end) = if len < points {
            (i, (i + 1).min(len))
        } else {
            (i * len / points, (i + 1) * len / points)
        };
        let max = samples
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0);
        *peak = (max as f32 / i16::MAX as f32).min(1.0);
    }
    peaks
}
