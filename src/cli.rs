use clap::{Parser, Subcommand};
use reelforge_core::{OutputFormat, PresetCategory};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reelforge")]
#[command(author, version, about = "Media download queue and conversion tool")]
pub struct Cli {
    /// Path to settings file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List conversion presets
    Presets {
        /// Only show one category (audio, video, compress, social)
        #[arg(long)]
        category: Option<PresetCategory>,
    },

    /// Probe a media file and display information
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert a file with a preset or custom transcoder arguments
    Convert {
        /// Input file
        #[arg(required = true)]
        input: PathBuf,

        /// Preset id (see `reelforge presets`)
        #[arg(long, conflicts_with = "args", required_unless_present = "args")]
        preset: Option<String>,

        /// Custom transcoder arguments, e.g. "-c:v libx264 -crf 20"
        #[arg(long, allow_hyphen_values = true)]
        args: Option<String>,

        /// Output file (derived from the input name if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Trim start, in seconds
        #[arg(long, requires = "end")]
        start: Option<f64>,

        /// Trim end, in seconds
        #[arg(long, requires = "start")]
        end: Option<f64>,
    },

    /// Download one or more URLs through the queue
    Download {
        /// URLs to download
        #[arg(required = true)]
        urls: Vec<String>,

        /// Output format (audio or video)
        #[arg(short, long, default_value = "video")]
        format: OutputFormat,

        /// Directory to save into (defaults to the configured download_dir)
        #[arg(short, long)]
        save_path: Option<PathBuf>,

        /// Concurrent downloads, 1 to 5 (defaults to the configured value)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Print peak amplitudes of a file's audio
    Waveform {
        #[arg(required = true)]
        file: PathBuf,

        /// Number of peaks to compute
        #[arg(long, default_value = "100")]
        points: usize,
    },

    /// Extract a single JPEG frame
    Thumbnail {
        #[arg(required = true)]
        file: PathBuf,

        /// Timestamp in seconds
        #[arg(long, default_value = "0")]
        at: f64,

        /// Output width in pixels
        #[arg(long, default_value = "320")]
        width: u32,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Display version information
    Version,
}
