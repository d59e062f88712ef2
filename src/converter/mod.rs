//! Conversion job management.
//!
//! [`ConverterService`] owns the collection of [`ConversionJob`]s. Starting a
//! conversion validates the request synchronously, registers the job in
//! `Queued` together with a cancellation token, and hands the rest to a
//! detached task (see [`pipeline`]). Runtime failures never escape that task;
//! they end up in the job's `error` field.

mod pipeline;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use reelforge_av::args::{derive_output_path, CONVERTED_SUFFIX, TRIMMED_SUFFIX};
use reelforge_av::{presets, probe, thumbnail, waveform, Tool, ToolRegistry, TranscodeArgs};
use reelforge_core::events::{Event, ProgressSink};
use reelforge_core::paths::extension_of;
use reelforge_core::{
    ConversionJob, ConversionPreset, ConversionProgress, ConversionState, Error, MediaInfo,
    PresetCategory, Result, TrimOptions,
};
use tokio_util::sync::CancellationToken;

/// Extension used when neither a preset nor the input names one.
const FALLBACK_EXTENSION: &str = "mp4";

// ---------------------------------------------------------------------------
// ConversionRequest
// ---------------------------------------------------------------------------

/// Parameters for [`ConverterService::start_conversion`].
///
/// Exactly one of `preset_id` and a non-empty `custom_args` must be set.
#[derive(Debug, Clone, Default)]
pub struct ConversionRequest {
    /// Job id; a UUID is generated when `None`.
    pub id: Option<String>,
    pub input: PathBuf,
    /// Output path; derived from `input` when `None` or empty.
    pub output: Option<PathBuf>,
    pub preset_id: Option<String>,
    pub custom_args: Option<Vec<String>>,
    pub trim: Option<TrimOptions>,
}

impl ConversionRequest {
    /// Convert `input` with a catalogue preset.
    pub fn preset(input: impl Into<PathBuf>, preset_id: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            preset_id: Some(preset_id.into()),
            ..Self::default()
        }
    }

    /// Convert `input` with caller-supplied transcoder arguments.
    pub fn custom(
        input: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            input: input.into(),
            custom_args: Some(args.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_trim(mut self, trim: TrimOptions) -> Self {
        self.trim = Some(trim);
        self
    }
}

/// Codec arguments resolved from a request.
enum CodecArgs {
    Preset(&'static ConversionPreset),
    Custom(Vec<String>),
}

// ---------------------------------------------------------------------------
// ConverterService
// ---------------------------------------------------------------------------

pub(crate) struct Inner {
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) sink: Arc<dyn ProgressSink>,
    pub(crate) jobs: RwLock<HashMap<String, ConversionJob>>,
    /// Registered when a job starts, removed when its task finishes.
    pub(crate) cancels: DashMap<String, CancellationToken>,
    pub(crate) temp_dir: PathBuf,
}

impl Inner {
    /// Mutate a job under the lock and return a progress snapshot for
    /// emission after the lock is released.
    pub(crate) fn update(
        &self,
        id: &str,
        f: impl FnOnce(&mut ConversionJob),
    ) -> Option<ConversionProgress> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(id)?;
        f(job);
        Some(job.to_progress())
    }

    pub(crate) fn emit(&self, progress: Option<ConversionProgress>) {
        if let Some(p) = progress {
            self.sink.emit(Event::ConversionProgress(p));
        }
    }
}

/// Owns conversion jobs and the transcoder processes that run them.
///
/// Cloning is cheap; clones share the same job collection.
#[derive(Clone)]
pub struct ConverterService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConverterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterService")
            .field("jobs", &self.inner.jobs.read().len())
            .field("running", &self.inner.cancels.len())
            .finish_non_exhaustive()
    }
}

impl ConverterService {
    /// `temp_dir` receives auxiliary outputs such as default thumbnails.
    pub fn new(tools: Arc<ToolRegistry>, sink: Arc<dyn ProgressSink>, temp_dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(Inner {
                tools,
                sink,
                jobs: RwLock::new(HashMap::new()),
                cancels: DashMap::new(),
                temp_dir,
            }),
        }
    }

    pub fn transcoder_available(&self) -> bool {
        self.inner.tools.is_available(Tool::Transcoder)
    }

    // -- Presets --------------------------------------------------------------

    pub fn presets(&self) -> &'static [ConversionPreset] {
        presets::all()
    }

    pub fn presets_by_category(&self, category: PresetCategory) -> Vec<&'static ConversionPreset> {
        presets::by_category(category)
    }

    pub fn preset(&self, id: &str) -> Result<&'static ConversionPreset> {
        presets::get(id)
    }

    // -- Analysis and auxiliary capabilities ----------------------------------

    /// Probe a file with the prober.
    pub async fn analyze_file(&self, path: &Path) -> Result<MediaInfo> {
        probe::analyze(&self.inner.tools, path).await
    }

    /// Peak amplitudes of `path`'s audio, `points` values in `[0, 1]`.
    pub async fn waveform(&self, path: &Path, points: usize) -> Result<Vec<f32>> {
        waveform::sample(&self.inner.tools, path, points).await
    }

    /// Extract one JPEG frame. Without `output` the frame goes to the
    /// service's temp directory.
    pub async fn thumbnail(
        &self,
        path: &Path,
        at_seconds: f64,
        width: u32,
        output: Option<&Path>,
    ) -> Result<PathBuf> {
        let output = match output {
            Some(p) => p.to_path_buf(),
            None => {
                reelforge_core::paths::ensure_dir(&self.inner.temp_dir)?;
                thumbnail::default_output(path, &self.inner.temp_dir)
            }
        };
        thumbnail::extract(&self.inner.tools, path, at_seconds, width, &output).await
    }

    // -- Jobs -----------------------------------------------------------------

    /// Validate `request`, register a `Queued` job, and start it in the
    /// background. Returns the registered job immediately.
    pub fn start_conversion(&self, request: ConversionRequest) -> Result<ConversionJob> {
        let codec = resolve_codec_args(&request)?;
        if let Some(trim) = &request.trim {
            trim.validate()?;
        }

        let ext = match &codec {
            CodecArgs::Preset(p) => p.output_ext.to_string(),
            CodecArgs::Custom(_) => {
                extension_of(&request.input).unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
            }
        };
        let output = match request.output.clone().filter(|p| !p.as_os_str().is_empty()) {
            Some(p) => p,
            None => {
                let suffix = if request.trim.is_some() {
                    TRIMMED_SUFFIX
                } else {
                    CONVERTED_SUFFIX
                };
                derive_output_path(&request.input, suffix, &ext)
            }
        };
        if output == request.input {
            return Err(Error::Validation(
                "output path must differ from input path".into(),
            ));
        }

        let args = TranscodeArgs::new(&request.input, &output).trim(request.trim);
        let args = match &codec {
            CodecArgs::Preset(p) => args.preset(p),
            CodecArgs::Custom(custom) => args.custom(custom.iter().cloned()),
        };

        let id = request
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut job = ConversionJob::new(id.clone(), request.input.clone(), output);
        job.preset_id = request.preset_id.clone();
        job.custom_args = match codec {
            CodecArgs::Custom(custom) => Some(custom),
            CodecArgs::Preset(_) => None,
        };
        job.trim_options = request.trim;

        let cancel = CancellationToken::new();
        {
            let mut jobs = self.inner.jobs.write();
            if jobs.contains_key(&id) {
                return Err(Error::Validation(format!(
                    "conversion job {id} already exists"
                )));
            }
            jobs.insert(id.clone(), job.clone());
            self.inner.cancels.insert(id.clone(), cancel.clone());
        }

        tracing::info!(
            job_id = %id,
            input = %job.input_path.display(),
            output = %job.output_path.display(),
            preset = ?job.preset_id,
            "Conversion queued"
        );
        self.inner.emit(Some(job.to_progress()));

        tokio::spawn(pipeline::run_job(self.inner.clone(), id, args, cancel));

        Ok(job)
    }

    /// As [`start_conversion`](Self::start_conversion), with optional trim.
    pub fn start_conversion_with_trim(
        &self,
        request: ConversionRequest,
        trim: Option<TrimOptions>,
    ) -> Result<ConversionJob> {
        self.start_conversion(ConversionRequest { trim, ..request })
    }

    /// Transcode `input` into `output` without registering a job.
    ///
    /// Used by the downloader, which reports progress under its own id.
    /// `on_percent` receives non-decreasing values in `[0, 100]`.
    pub async fn run_inline(
        &self,
        input: &Path,
        output: &Path,
        codec_args: &[String],
        cancel: &CancellationToken,
        on_percent: impl FnMut(f64) + Send,
    ) -> Result<()> {
        let args = TranscodeArgs::new(input, output).custom(codec_args.iter().cloned());
        pipeline::transcode_inline(&self.inner, &args, cancel, on_percent).await
    }

    /// Trigger cancellation of a running job.
    pub fn cancel_conversion(&self, id: &str) -> Result<()> {
        let token = self
            .inner
            .cancels
            .get(id)
            .map(|t| t.value().clone())
            .ok_or_else(|| Error::not_found("running conversion job", id))?;
        tracing::info!(job_id = %id, "Cancelling conversion");
        token.cancel();
        Ok(())
    }

    /// Remove a finished job. Jobs that are still queued or running are
    /// refused.
    pub fn remove_job(&self, id: &str) -> Result<()> {
        let mut jobs = self.inner.jobs.write();
        let job = jobs
            .get(id)
            .ok_or_else(|| Error::not_found("conversion job", id))?;
        if job.is_running() {
            return Err(Error::invalid_state(id, job.state));
        }
        jobs.remove(id);
        Ok(())
    }

    /// Remove every `Completed` job. Returns how many were removed.
    pub fn clear_completed_jobs(&self) -> usize {
        let mut jobs = self.inner.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, j| j.state != ConversionState::Completed);
        before - jobs.len()
    }

    /// All jobs, oldest first.
    pub fn jobs(&self) -> Vec<ConversionJob> {
        let mut jobs: Vec<ConversionJob> = self.inner.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub fn job(&self, id: &str) -> Option<ConversionJob> {
        self.inner.jobs.read().get(id).cloned()
    }
}

fn resolve_codec_args(request: &ConversionRequest) -> Result<CodecArgs> {
    let custom = request.custom_args.as_ref().filter(|a| !a.is_empty());
    match (request.preset_id.as_deref(), custom) {
        (Some(id), None) => presets::get(id).map(CodecArgs::Preset),
        (None, Some(args)) => Ok(CodecArgs::Custom(args.clone())),
        (Some(_), Some(_)) => Err(Error::Validation(
            "set either a preset or custom arguments, not both".into(),
        )),
        (None, None) => Err(Error::Validation(
            "a preset or custom arguments are required".into(),
        )),
    }
}
