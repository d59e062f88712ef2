//! Per-job execution: analyze, transcode, finish.

use std::path::Path;
use std::sync::Arc;

use reelforge_av::{probe, ProgressParser, Tool, ToolCommand, TranscodeArgs};
use reelforge_core::paths::PartialFile;
use reelforge_core::{ConversionState, Error, Result};
use tokio_util::sync::CancellationToken;

use super::Inner;

/// Drive one registered job to a terminal state.
pub(super) async fn run_job(
    inner: Arc<Inner>,
    id: String,
    args: TranscodeArgs,
    cancel: CancellationToken,
) {
    let outcome = execute(&inner, &id, &args, &cancel).await;
    inner.cancels.remove(&id);

    let progress = match outcome {
        Ok(()) => {
            tracing::info!(job_id = %id, output = %args.output().display(), "Conversion completed");
            inner.update(&id, |job| job.complete())
        }
        Err(e) if e.is_cancelled() => {
            tracing::info!(job_id = %id, "Conversion cancelled");
            inner.update(&id, |job| job.cancel())
        }
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Conversion failed");
            inner.update(&id, |job| job.fail(e.to_string()))
        }
    };
    inner.emit(progress);
}

async fn execute(
    inner: &Inner,
    id: &str,
    args: &TranscodeArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let input = inner
        .jobs
        .read()
        .get(id)
        .map(|j| j.input_path.clone())
        .ok_or_else(|| Error::not_found("conversion job", id))?;

    inner.emit(inner.update(id, |job| job.state = ConversionState::Analyzing));

    let info = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        info = probe::analyze(&inner.tools, &input) => info?,
    };
    let duration = args.expected_duration(info.duration_seconds);

    inner.emit(inner.update(id, |job| {
        job.duration_seconds = duration;
        job.input_info = Some(info);
        job.state = ConversionState::Converting;
    }));
    tracing::info!(job_id = %id, duration, "Transcoding");

    let mut parser = ProgressParser::new(duration);
    transcode(inner, args, cancel, |line| {
        if let Some(snap) = parser.feed(line) {
            let progress = inner.update(id, |job| {
                job.current_time_seconds = snap.current_time_seconds;
                job.speed = snap.speed;
                job.progress = job.progress.max(snap.percent);
            });
            inner.emit(progress);
        }
    })
    .await
}

/// Run the transcoder for `args`, removing the output unless it succeeds.
async fn transcode(
    inner: &Inner,
    args: &TranscodeArgs,
    cancel: &CancellationToken,
    on_line: impl FnMut(&str),
) -> Result<()> {
    let ffmpeg = inner.tools.require(Tool::Transcoder)?;
    if let Some(parent) = args.output().parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = PartialFile::new(args.output());
    ToolCommand::new(ffmpeg.to_path_buf())
        .no_timeout()
        .args(args.build())
        .execute_streaming(on_line, cancel)
        .await?;

    let produced = tokio::fs::metadata(partial.path())
        .await
        .map(|m| m.len() > 0)
        .unwrap_or(false);
    if !produced {
        return Err(Error::ConversionFailed(format!(
            "transcoder produced no output at {}",
            partial.path().display()
        )));
    }
    partial.keep();
    Ok(())
}

/// Probe then transcode, reporting percent only. No job bookkeeping.
pub(super) async fn transcode_inline(
    inner: &Inner,
    args: &TranscodeArgs,
    cancel: &CancellationToken,
    mut on_percent: impl FnMut(f64),
) -> Result<()> {
    let input: &Path = args.input();
    let duration = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        info = probe::analyze(&inner.tools, input) => match info {
            Ok(info) => info.duration_seconds,
            Err(e) => {
                tracing::warn!(input = %input.display(), error = %e, "probe failed; progress will be coarse");
                0.0
            }
        },
    };

    let mut parser = ProgressParser::new(duration);
    on_percent(0.0);
    transcode(inner, args, cancel, |line| {
        if let Some(snap) = parser.feed(line) {
            on_percent(snap.percent);
        }
    })
    .await?;
    on_percent(100.0);
    Ok(())
}
