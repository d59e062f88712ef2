//! Transcoder argument builder.
//!
//! Composes the fixed invocation prefix, optional trim flags, the preset or
//! custom codec arguments, and the output path into one argument list:
//!
//! ```text
//! -y -i <input> -progress pipe:1 -nostats [-ss <start> -t <duration>] <codec args> <output>
//! ```

use std::path::{Path, PathBuf};

use reelforge_core::{ConversionPreset, TrimOptions};

/// Output name suffix for plain conversions.
pub const CONVERTED_SUFFIX: &str = "_converted";
/// Output name suffix for trimmed conversions.
pub const TRIMMED_SUFFIX: &str = "_trimmed";

/// Builder for one transcoder invocation.
#[derive(Debug, Clone)]
pub struct TranscodeArgs {
    input: PathBuf,
    output: PathBuf,
    codec_args: Vec<String>,
    trim: Option<TrimOptions>,
}

impl TranscodeArgs {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            codec_args: Vec::new(),
            trim: None,
        }
    }

    /// Use a preset's codec arguments.
    pub fn preset(mut self, preset: &ConversionPreset) -> Self {
        self.codec_args = preset.transcoder_args.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Use caller-supplied codec arguments.
    pub fn custom(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.codec_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn trim(mut self, trim: Option<TrimOptions>) -> Self {
        self.trim = trim;
        self
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Length of media the transcoder will produce, given the input length.
    /// Used as the denominator for percent.
    pub fn expected_duration(&self, input_duration: f64) -> f64 {
        match self.trim {
            Some(t) if input_duration > 0.0 => {
                (input_duration - t.start_time_seconds).clamp(0.0, t.duration_seconds())
            }
            Some(t) => t.duration_seconds(),
            None => input_duration,
        }
    }

    pub fn build(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            self.input.to_string_lossy().into_owned(),
        ];
        args.extend(["-progress", "pipe:1", "-nostats"].map(String::from));
        if let Some(t) = self.trim {
            args.push("-ss".into());
            args.push(format_seconds(t.start_time_seconds));
            args.push("-t".into());
            args.push(format_seconds(t.duration_seconds()));
        }
        args.extend(self.codec_args.iter().cloned());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

fn format_seconds(s: f64) -> String {
    let text = format!("{s:.3}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Derive `<dir>/<stem><suffix>.<ext>` from `input`.
///
/// # Examples
///
/// ```
/// use reelforge_av::args::derive_output_path;
/// use std::path::{Path, PathBuf};
///
/// assert_eq!(
///     derive_output_path(Path::new("/media/clip.mkv"), "_converted", "mp4"),
///     PathBuf::from("/media/clip_converted.mp4"),
/// );
/// ```
pub fn derive_output_path(input: &Path, suffix: &str, ext: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = format!("{stem}{suffix}.{ext}");
    match input.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}
