//! Single-frame thumbnail extraction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reelforge_core::{Error, Result};

use crate::command::ToolCommand;
use crate::tools::{Tool, ToolRegistry};

/// Time allowed for extraction.
pub const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Write one JPEG frame of `input` at `at_seconds`, scaled to `width`
/// (height follows the aspect ratio), to `output`.
pub async fn extract(
    tools: &ToolRegistry,
    input: &Path,
    at_seconds: f64,
    width: u32,
    output: &Path,
) -> Result<PathBuf> {
    if !at_seconds.is_finite() || at_seconds < 0.0 {
        return Err(Error::Validation(format!(
            "thumbnail time must be a non-negative number (got {at_seconds})"
        )));
    }
    if width == 0 {
        return Err(Error::Validation("thumbnail width must be positive".into()));
    }
    if !input.exists() {
        return Err(Error::not_found("file", input.display()));
    }
    let ffmpeg = tools.require(Tool::Transcoder)?;

    ToolCommand::new(ffmpeg.to_path_buf())
        .args(["-v", "error", "-y", "-ss"])
        .arg(format!("{at_seconds:.3}"))
        .arg("-i")
        .arg(input.to_string_lossy())
        .args(["-frames:v", "1", "-q:v", "3", "-vf"])
        .arg(format!("scale={width}:-2"))
        .arg(output.to_string_lossy())
        .timeout(THUMBNAIL_TIMEOUT)
        .execute()
        .await?;

    if !output.exists() {
        return Err(Error::tool(
            Tool::Transcoder.binary_name(),
            format!("no frame written at {at_seconds}s"),
        ));
    }

    tracing::debug!(input = %input.display(), output = %output.display(), "thumbnail written");
    Ok(output.to_path_buf())
}

/// Default thumbnail location for `input` inside `dir`.
pub fn default_output(input: &Path, dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "thumbnail".to_string());
    dir.join(format!("{stem}_thumb.jpg"))
}
